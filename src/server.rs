//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (version and in-flight adaptations) |
//! | `POST`   | `/adaptations/{id}/normalize` | Detect and normalize chapters |
//! | `GET`    | `/adaptations/{id}/chapter_map` | Latest run, paginated |
//! | `GET`    | `/adaptations/{id}/chapters` | Stored chapters |
//! | `DELETE` | `/adaptations/{id}` | Remove an adaptation and its runs |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "run_in_progress", "message": "run 3f2a… holds adaptation 7" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `empty_input`, `no_original_chapter_count`, `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `run_in_progress` | 409 |
//! | `rate_limited` | 429, with `Retry-After` |
//! | `persist_failed`, `run_abandoned`, `internal` | 500 |

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use chapmap_core::error::RunError;
use chapmap_core::models::{Chapter, DetectionMethod, Mode, ReadingAge};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::orchestrator::{
    NormalizationRequest, Orchestrator, Page, RunResult, RunStatusView, TargetCountSource,
};
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router around an existing orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/adaptations/{id}/normalize", post(handle_normalize))
        .route("/adaptations/{id}/chapter_map", get(handle_chapter_map))
        .route("/adaptations/{id}/chapters", get(handle_chapters))
        .route("/adaptations/{id}", delete(handle_delete))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Starts the HTTP server on `[server].bind`.
///
/// Applies the schema first, so a fresh database path works without a
/// separate `chapmap init`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let orchestrator = Arc::new(Orchestrator::from_config(store, config));
    let app = router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "chapmap server listening");
    println!("chapmap server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal error".to_string(),
        retry_after: None,
    }
}

/// Map a run error to its HTTP status. `run_id` names the failed run, if
/// one was recorded.
fn run_error(adaptation_id: i64, error: &RunError, run_id: Option<&str>) -> AppError {
    let (status, message, retry_after) = match error {
        RunError::EmptyInput => (
            StatusCode::BAD_REQUEST,
            "no chapter segments detected in the text".to_string(),
            None,
        ),
        RunError::NoOriginalChapterCount => (
            StatusCode::BAD_REQUEST,
            "keep-original needs existing chapters or a chapter count".to_string(),
            None,
        ),
        RunError::RunInProgress { holder_run_id } => (
            StatusCode::CONFLICT,
            match holder_run_id {
                Some(holder) => format!("run {} holds adaptation {}", holder, adaptation_id),
                None => format!("adaptation {} is locked", adaptation_id),
            },
            None,
        ),
        RunError::RateLimited { wait_seconds } => (
            StatusCode::TOO_MANY_REQUESTS,
            format!("retry in {} seconds", wait_seconds),
            Some(*wait_seconds),
        ),
        RunError::PersistFailed | RunError::RunAbandoned | RunError::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("run {} failed", run_id.unwrap_or("-")),
            None,
        ),
    };
    AppError {
        status,
        code: error.code().to_string(),
        message,
        retry_after,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    in_flight: Vec<i64>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        in_flight: state.orchestrator.in_flight(),
    })
}

// ============ POST /adaptations/{id}/normalize ============

#[derive(Deserialize)]
struct NormalizeBody {
    text: String,
    /// Defaults to keep-original.
    #[serde(default)]
    mode: Option<String>,
    /// Trusted chapter count.
    #[serde(default)]
    chapters: Option<usize>,
    /// Reading-age band such as "6-8".
    #[serde(default)]
    age: Option<String>,
}

#[derive(Serialize)]
struct NormalizeResponse {
    status: &'static str,
    run_id: String,
    detector: DetectionMethod,
    detected_count: usize,
    target_count: usize,
}

async fn handle_normalize(
    State(state): State<AppState>,
    Path(adaptation_id): Path<i64>,
    Json(body): Json<NormalizeBody>,
) -> Result<Json<NormalizeResponse>, AppError> {
    let mode = match body.mode.as_deref() {
        Some(raw) => raw.parse::<Mode>().map_err(bad_request)?,
        None => Mode::KeepOriginal,
    };
    let target = match (body.chapters, body.age.as_deref()) {
        (Some(n), _) => TargetCountSource::ChapterCount(n),
        (None, Some(band)) => TargetCountSource::WordBudget(ReadingAge::from_band(band)),
        (None, None) => TargetCountSource::Unspecified,
    };

    let result = state
        .orchestrator
        .start_normalization(NormalizationRequest {
            adaptation_id,
            mode,
            target,
            text: body.text,
        })
        .await;

    match result {
        RunResult::Succeeded {
            run_id,
            detector,
            detected_count,
            target_count,
        } => Ok(Json(NormalizeResponse {
            status: "succeeded",
            run_id,
            detector,
            detected_count,
            target_count,
        })),
        RunResult::Failed { run_id, error } => {
            Err(run_error(adaptation_id, &error, Some(&run_id)))
        }
        RunResult::Rejected { error } => Err(run_error(adaptation_id, &error, None)),
    }
}

// ============ GET /adaptations/{id}/chapter_map ============

#[derive(Deserialize)]
struct PageQuery {
    offset: Option<i64>,
    limit: Option<i64>,
}

async fn handle_chapter_map(
    State(state): State<AppState>,
    Path(adaptation_id): Path<i64>,
    Query(q): Query<PageQuery>,
) -> Result<Json<RunStatusView>, AppError> {
    let view = state
        .orchestrator
        .run_status(adaptation_id, Page::new(q.offset, q.limit))
        .await
        .map_err(internal)?;
    view.map(Json)
        .ok_or_else(|| not_found(format!("no runs for adaptation {}", adaptation_id)))
}

// ============ GET /adaptations/{id}/chapters ============

#[derive(Serialize)]
struct ChaptersResponse {
    adaptation_id: i64,
    chapters: Vec<Chapter>,
}

async fn handle_chapters(
    State(state): State<AppState>,
    Path(adaptation_id): Path<i64>,
) -> Result<Json<ChaptersResponse>, AppError> {
    let chapters = state
        .orchestrator
        .chapters(adaptation_id)
        .await
        .map_err(internal)?;
    Ok(Json(ChaptersResponse {
        adaptation_id,
        chapters,
    }))
}

// ============ DELETE /adaptations/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    adaptation_id: i64,
    deleted: bool,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(adaptation_id): Path<i64>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .orchestrator
        .delete_adaptation(adaptation_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(run_error(
            adaptation_id,
            &RunError::RunInProgress {
                holder_run_id: None,
            },
            None,
        ));
    }
    Ok(Json(DeleteResponse {
        adaptation_id,
        deleted,
    }))
}
