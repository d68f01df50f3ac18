//! Normalization run orchestration.
//!
//! A run moves through `acquiring-lock → normalizing → persisting` and ends
//! `succeeded` or `failed`, or is rejected before it starts:
//!
//! ```text
//! cooldown ──▶ lock ──▶ detect ──▶ normalize ──▶ replace chapters
//!    │           │                                    │
//!    ▼           ▼                                    ▼
//! rate_limited  run_in_progress          succeeded / persist_failed
//! ```
//!
//! The lock is released on every exit, including errors and panics raised
//! while it is held. The `running` row is written right after the lock is
//! taken, so every run that got past the lock leaves exactly one
//! `adaptation_runs` row. If the process dies mid-run, the lock, pointer and
//! row are recovered once they are older than the stale timeout, by the
//! next status read or the next start for that adaptation.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use chapmap_core::detect::{detect, Detection};
use chapmap_core::error::RunError;
use chapmap_core::models::{
    ActiveRunPointer, DetectionMethod, Mode, NewRun, Operation, ReadingAge, Rule, Run,
    RunCompletion, RunMeta, RunStage, RunStatus, SourceMapEntry,
};
use chapmap_core::normalize::{cap_operations, normalize_with};
use chapmap_core::store::Store;

use crate::config::{Config, DetectionConfig, RunsConfig};
use crate::guard::{window_ms, ConcurrencyGuard, Cooldown, LockHandle};

/// Where the target chapter count comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetCountSource {
    /// A chapter count the caller vouches for.
    ChapterCount(usize),
    /// Only a reading-age band; sets the word budget in auto-wordcount mode.
    WordBudget(ReadingAge),
    Unspecified,
}

impl TargetCountSource {
    fn trusted_count(&self) -> Option<NonZeroUsize> {
        match self {
            TargetCountSource::ChapterCount(n) => NonZeroUsize::new(*n),
            _ => None,
        }
    }

    fn reading_age(&self) -> ReadingAge {
        match self {
            TargetCountSource::WordBudget(age) => *age,
            _ => ReadingAge::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizationRequest {
    pub adaptation_id: i64,
    pub mode: Mode,
    pub target: TargetCountSource,
    pub text: String,
}

/// Outcome of [`Orchestrator::start_normalization`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded {
        run_id: String,
        detector: DetectionMethod,
        detected_count: usize,
        target_count: usize,
    },
    /// A run was recorded and ended `failed`.
    Failed { run_id: String, error: RunError },
    /// Nothing was started or mutated.
    Rejected { error: RunError },
}

impl RunResult {
    pub fn error(&self) -> Option<&RunError> {
        match self {
            RunResult::Succeeded { .. } => None,
            RunResult::Failed { error, .. } | RunResult::Rejected { error } => Some(error),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            RunResult::Succeeded { run_id, .. } | RunResult::Failed { run_id, .. } => Some(run_id),
            RunResult::Rejected { .. } => None,
        }
    }
}

/// Pagination over a run's operations and lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 200;
    pub const MAX_LIMIT: usize = 1000;

    /// Negative offsets become 0; the limit is clamped to `1..=1000`.
    pub fn new(offset: Option<i64>, limit: Option<i64>) -> Self {
        let offset = offset.unwrap_or(0).max(0) as usize;
        let limit = limit
            .unwrap_or(Self::DEFAULT_LIMIT as i64)
            .clamp(1, Self::MAX_LIMIT as i64) as usize;
        Self { offset, limit }
    }

    fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset)
            .take(self.limit)
            .cloned()
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// The latest run of an adaptation, as returned by
/// [`Orchestrator::run_status`].
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub run_id: String,
    pub adaptation_id: i64,
    pub status: RunStatus,
    pub error: Option<String>,
    pub detector: Option<DetectionMethod>,
    pub rule: Option<Rule>,
    pub pattern: Option<String>,
    pub detected_count: usize,
    pub target_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Stage of the run currently in flight for this adaptation, if any.
    pub active_stage: Option<RunStage>,
    pub offset: usize,
    pub limit: usize,
    pub operations_total: usize,
    pub final_map_total: usize,
    pub operations: Vec<Operation>,
    pub final_map: Vec<SourceMapEntry>,
}

impl RunStatusView {
    fn build(run: Run, active_stage: Option<RunStage>, page: Page) -> Self {
        Self {
            detector: run.detector(),
            rule: run.meta.rule,
            pattern: run.meta.pattern.clone(),
            operations_total: run.operations.len(),
            final_map_total: run.final_map.len(),
            operations: page.slice(&run.operations),
            final_map: page.slice(&run.final_map),
            offset: page.offset,
            limit: page.limit,
            active_stage,
            run_id: run.run_id,
            adaptation_id: run.adaptation_id,
            status: run.status,
            error: run.error,
            detected_count: run.detected_count,
            target_count: run.target_count,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_ms: run.duration_ms,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    guard: ConcurrencyGuard,
    runs: RunsConfig,
    detection: DetectionConfig,
    /// Process-local view of in-flight runs. Refreshed from the durable
    /// pointer on every status read; never consulted for decisions.
    active: RwLock<HashMap<i64, ActiveRunPointer>>,
}

fn elapsed_ms(started: DateTime<Utc>) -> i64 {
    (Utc::now() - started).num_milliseconds().max(0)
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, runs: RunsConfig, detection: DetectionConfig) -> Self {
        Self {
            guard: ConcurrencyGuard::new(store.clone()),
            store,
            runs,
            detection,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::new(store, config.runs.clone(), config.detection.clone())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Adaptation ids with a run in flight in this process.
    pub fn in_flight(&self) -> Vec<i64> {
        let active = self.active.read().unwrap();
        let mut ids: Vec<i64> = active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Run detection and normalization for one adaptation and persist the
    /// result.
    pub async fn start_normalization(&self, req: NormalizationRequest) -> RunResult {
        let adaptation_id = req.adaptation_id;

        match self
            .guard
            .check_cooldown(adaptation_id, self.runs.reprocess_cooldown_secs, Utc::now())
            .await
        {
            Ok(Cooldown::Ready) => {}
            Ok(Cooldown::Wait { seconds }) => {
                tracing::info!(adaptation_id, wait_seconds = seconds, "reprocess rate limited");
                return RunResult::Rejected {
                    error: RunError::RateLimited {
                        wait_seconds: seconds,
                    },
                };
            }
            Err(e) => {
                tracing::error!(adaptation_id, error = %format!("{:#}", e), "cooldown check failed");
                return RunResult::Rejected {
                    error: RunError::Internal,
                };
            }
        }

        let run_id = Uuid::new_v4().to_string();
        let handle = match self.acquire(adaptation_id, &run_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                let holder_run_id = self.guard.holder(adaptation_id).await.ok().flatten();
                tracing::info!(adaptation_id, holder = ?holder_run_id, "run already in progress");
                return RunResult::Rejected {
                    error: RunError::RunInProgress { holder_run_id },
                };
            }
            Err(e) => {
                tracing::error!(adaptation_id, error = %format!("{:#}", e), "lock acquisition failed");
                return RunResult::Rejected {
                    error: RunError::Internal,
                };
            }
        };

        let started = Utc::now();
        let outcome = AssertUnwindSafe(self.run_locked(&run_id, &req, started))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(adaptation_id, run_id = %run_id, error = %format!("{:#}", e), "run failed unexpectedly");
                self.fail_internal(&run_id, adaptation_id, started).await;
                RunResult::Failed {
                    run_id: run_id.clone(),
                    error: RunError::Internal,
                }
            }
            Err(_) => {
                tracing::error!(adaptation_id, run_id = %run_id, "run panicked");
                self.fail_internal(&run_id, adaptation_id, started).await;
                RunResult::Failed {
                    run_id: run_id.clone(),
                    error: RunError::Internal,
                }
            }
        };

        if let Err(e) = self.guard.release(handle).await {
            tracing::error!(adaptation_id, run_id = %run_id, error = %format!("{:#}", e), "lock release failed");
        }
        result
    }

    /// Take the adaptation lock. A held lock gets one recovery pass for rows
    /// left behind by a dead process, then one more attempt.
    async fn acquire(&self, adaptation_id: i64, run_id: &str) -> Result<Option<LockHandle>> {
        if let Some(handle) = self.guard.try_acquire(adaptation_id, run_id).await? {
            return Ok(Some(handle));
        }
        if !self.recover_stale(adaptation_id, Utc::now()).await? {
            return Ok(None);
        }
        self.guard.try_acquire(adaptation_id, run_id).await
    }

    async fn run_locked(
        &self,
        run_id: &str,
        req: &NormalizationRequest,
        started: DateTime<Utc>,
    ) -> Result<RunResult> {
        let adaptation_id = req.adaptation_id;
        self.store
            .create_run(&NewRun {
                run_id: run_id.to_string(),
                adaptation_id,
                detected_count: 0,
                target_count: 0,
                started_at: started,
            })
            .await?;
        self.set_stage(adaptation_id, run_id, RunStage::Starting)
            .await?;

        let existing = self.store.get_chapters(adaptation_id).await?;
        let trusted = req.target.trusted_count();

        if req.mode == Mode::KeepOriginal && existing.is_empty() && trusted.is_none() {
            tracing::warn!(
                adaptation_id,
                run_id,
                "keep-original refused: no existing chapters and no chapter count"
            );
            let meta = RunMeta {
                rule: Some(Rule::StrictKeepOriginal),
                ..RunMeta::default()
            };
            return self
                .finish_failed(
                    run_id,
                    adaptation_id,
                    started,
                    RunError::NoOriginalChapterCount,
                    Vec::new(),
                    Vec::new(),
                    meta,
                )
                .await;
        }

        let opts = self.detection.options(req.mode, req.target.reading_age());
        let Detection {
            segments,
            method,
            pattern,
        } = detect(&req.text, &opts);
        let detected_count = segments.len();

        let target_count = if !existing.is_empty() {
            existing.len()
        } else if let Some(n) = trusted {
            n.get()
        } else {
            detected_count
        };

        tracing::info!(
            adaptation_id,
            run_id,
            method = %method,
            pattern = pattern.unwrap_or("-"),
            detected_count,
            target_count,
            "chapter detection finished"
        );

        self.set_stage(adaptation_id, run_id, RunStage::Normalizing)
            .await?;

        let mut meta = RunMeta {
            rule: Some(req.mode.rule()),
            detector: Some(method),
            pattern: pattern.map(str::to_string),
            detected_count,
            target_count,
            merge_ops: 0,
            split_ops: 0,
        };

        let normalized = match NonZeroUsize::new(target_count)
            .ok_or(RunError::EmptyInput)
            .and_then(|target| normalize_with(&segments, target, &opts.paragraphs))
        {
            Ok(normalized) => normalized,
            Err(error) => {
                tracing::warn!(adaptation_id, run_id, error = %error, "nothing to normalize");
                return self
                    .finish_failed(run_id, adaptation_id, started, error, Vec::new(), Vec::new(), meta)
                    .await;
            }
        };

        meta.merge_ops = normalized.merge_count();
        meta.split_ops = normalized.split_count();
        let summary = Operation::Summary {
            detector: method,
            rule: req.mode.rule(),
            detected_count,
            target_count,
            merge_ops: meta.merge_ops,
            split_ops: meta.split_ops,
        };
        let operations = cap_operations(summary, normalized.operations, self.runs.max_ops);

        let (merge_ops, split_ops) = (meta.merge_ops, meta.split_ops);
        self.set_stage(adaptation_id, run_id, RunStage::Persisting)
            .await?;

        if let Err(e) = self
            .store
            .replace_chapters(adaptation_id, &normalized.segments)
            .await
        {
            tracing::error!(adaptation_id, run_id, error = %format!("{:#}", e), "chapter replacement failed");
            return self
                .finish_failed(
                    run_id,
                    adaptation_id,
                    started,
                    RunError::PersistFailed,
                    operations,
                    normalized.final_map,
                    meta,
                )
                .await;
        }

        self.finish(
            run_id,
            adaptation_id,
            RunCompletion {
                finished_at: Utc::now(),
                detected_count,
                target_count,
                duration_ms: elapsed_ms(started),
                operations,
                final_map: normalized.final_map,
                status: RunStatus::Succeeded,
                error: None,
                meta,
            },
        )
        .await?;

        tracing::info!(
            adaptation_id,
            run_id,
            chapters = target_count,
            merge_ops,
            split_ops,
            "normalization succeeded"
        );

        Ok(RunResult::Succeeded {
            run_id: run_id.to_string(),
            detector: method,
            detected_count,
            target_count,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_failed(
        &self,
        run_id: &str,
        adaptation_id: i64,
        started: DateTime<Utc>,
        error: RunError,
        operations: Vec<Operation>,
        final_map: Vec<SourceMapEntry>,
        meta: RunMeta,
    ) -> Result<RunResult> {
        self.finish(
            run_id,
            adaptation_id,
            RunCompletion {
                finished_at: Utc::now(),
                detected_count: meta.detected_count,
                target_count: meta.target_count,
                duration_ms: elapsed_ms(started),
                operations,
                final_map,
                status: RunStatus::Failed,
                error: Some(error.clone()),
                meta,
            },
        )
        .await?;
        Ok(RunResult::Failed {
            run_id: run_id.to_string(),
            error,
        })
    }

    async fn finish(&self, run_id: &str, adaptation_id: i64, completion: RunCompletion) -> Result<()> {
        if !self.store.finish_run(run_id, &completion).await? {
            tracing::warn!(adaptation_id, run_id, "run was no longer running at completion");
        }
        self.clear_stage(adaptation_id, run_id).await
    }

    /// Best-effort terminal record for a run that errored or panicked.
    async fn fail_internal(&self, run_id: &str, adaptation_id: i64, started: DateTime<Utc>) {
        let existing = self.store.get_run(run_id).await.ok().flatten();
        if existing.is_none() {
            let created = self
                .store
                .create_run(&NewRun {
                    run_id: run_id.to_string(),
                    adaptation_id,
                    detected_count: 0,
                    target_count: 0,
                    started_at: started,
                })
                .await;
            if let Err(e) = created {
                tracing::error!(adaptation_id, run_id, error = %format!("{:#}", e), "could not record failed run");
            }
        }

        let (detected_count, target_count) = existing
            .map(|r| (r.detected_count, r.target_count))
            .unwrap_or((0, 0));
        let completion = RunCompletion {
            finished_at: Utc::now(),
            detected_count,
            target_count,
            duration_ms: elapsed_ms(started),
            operations: Vec::new(),
            final_map: Vec::new(),
            status: RunStatus::Failed,
            error: Some(RunError::Internal),
            meta: RunMeta::default(),
        };
        if let Err(e) = self.finish(run_id, adaptation_id, completion).await {
            tracing::error!(adaptation_id, run_id, error = %format!("{:#}", e), "could not finish failed run");
            self.forget(adaptation_id, run_id);
        }
    }

    async fn set_stage(&self, adaptation_id: i64, run_id: &str, stage: RunStage) -> Result<()> {
        let pointer = ActiveRunPointer {
            adaptation_id,
            run_id: run_id.to_string(),
            stage,
            updated_at: Utc::now(),
        };
        self.store.upsert_active_pointer(&pointer).await?;
        tracing::debug!(adaptation_id, run_id, stage = stage.as_str(), "run stage");
        self.active.write().unwrap().insert(adaptation_id, pointer);
        Ok(())
    }

    async fn clear_stage(&self, adaptation_id: i64, run_id: &str) -> Result<()> {
        self.store
            .clear_active_pointer(adaptation_id, run_id)
            .await?;
        self.forget(adaptation_id, run_id);
        Ok(())
    }

    fn forget(&self, adaptation_id: i64, run_id: &str) {
        let mut active = self.active.write().unwrap();
        if active
            .get(&adaptation_id)
            .is_some_and(|p| p.run_id == run_id)
        {
            active.remove(&adaptation_id);
        }
    }

    /// Read the durable pointer and bring the local view in line with it.
    async fn refresh_active(&self, adaptation_id: i64) -> Result<Option<ActiveRunPointer>> {
        let pointer = self.store.get_active_pointer(adaptation_id).await?;
        let mut active = self.active.write().unwrap();
        match &pointer {
            Some(p) => {
                active.insert(adaptation_id, p.clone());
            }
            None => {
                active.remove(&adaptation_id);
            }
        }
        Ok(pointer)
    }

    /// Latest run of an adaptation, after recovering anything stale.
    ///
    /// Returns `None` when the adaptation has no runs.
    pub async fn run_status(&self, adaptation_id: i64, page: Page) -> Result<Option<RunStatusView>> {
        self.recover_stale(adaptation_id, Utc::now()).await?;

        let active_stage = self.refresh_active(adaptation_id).await?.map(|p| p.stage);
        let Some(run) = self.store.get_last_run(adaptation_id).await? else {
            return Ok(None);
        };
        Ok(Some(RunStatusView::build(run, active_stage, page)))
    }

    /// Clean up after runs whose process died.
    ///
    /// A `running` row older than the stale timeout is finished as
    /// `run_abandoned`. A lock or pointer older than the timeout is removed
    /// unless a fresh `running` row owns it. Returns whether anything was
    /// recovered.
    async fn recover_stale(&self, adaptation_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let timeout_ms = window_ms(self.runs.stale_run_timeout_secs);
        let is_stale = |ts: DateTime<Utc>| (now - ts).num_milliseconds() > timeout_ms;
        let mut recovered = false;

        if let Some(run) = self.store.get_last_run(adaptation_id).await? {
            if run.status == RunStatus::Running && is_stale(run.started_at) {
                self.reap(&run, now).await?;
                recovered = true;
            }
        }

        if let Some(lock) = self.store.get_lock(adaptation_id).await? {
            match self.store.get_run(&lock.holder).await? {
                Some(run) if run.status == RunStatus::Running => {
                    if is_stale(run.started_at) {
                        self.reap(&run, now).await?;
                        recovered = true;
                    }
                }
                _ if is_stale(lock.acquired_at) => {
                    self.store.delete_lock(adaptation_id, &lock.holder).await?;
                    tracing::warn!(adaptation_id, holder = %lock.holder, "orphaned lock reclaimed");
                    recovered = true;
                }
                _ => {}
            }
        }

        if let Some(pointer) = self.store.get_active_pointer(adaptation_id).await? {
            match self.store.get_run(&pointer.run_id).await? {
                Some(run) if run.status == RunStatus::Running => {
                    if is_stale(run.started_at) {
                        self.reap(&run, now).await?;
                        recovered = true;
                    }
                }
                _ if is_stale(pointer.updated_at) => {
                    self.clear_stage(adaptation_id, &pointer.run_id).await?;
                    tracing::warn!(adaptation_id, run_id = %pointer.run_id, "orphaned run pointer cleared");
                    recovered = true;
                }
                _ => {}
            }
        }

        Ok(recovered)
    }

    async fn reap(&self, run: &Run, now: DateTime<Utc>) -> Result<()> {
        let adaptation_id = run.adaptation_id;
        let completion = RunCompletion {
            finished_at: now,
            detected_count: run.detected_count,
            target_count: run.target_count,
            duration_ms: (now - run.started_at).num_milliseconds().max(0),
            operations: run.operations.clone(),
            final_map: run.final_map.clone(),
            status: RunStatus::Failed,
            error: Some(RunError::RunAbandoned),
            meta: run.meta.clone(),
        };
        self.store.finish_run(&run.run_id, &completion).await?;
        self.clear_stage(adaptation_id, &run.run_id).await?;
        self.store.delete_lock(adaptation_id, &run.run_id).await?;

        tracing::warn!(adaptation_id, run_id = %run.run_id, "stale run reaped as abandoned");
        Ok(())
    }

    /// Chapters currently stored for an adaptation.
    pub async fn chapters(&self, adaptation_id: i64) -> Result<Vec<chapmap_core::models::Chapter>> {
        self.store.get_chapters(adaptation_id).await
    }

    /// Remove every record of an adaptation.
    ///
    /// Returns `false` without deleting anything while a run holds the lock.
    pub async fn delete_adaptation(&self, adaptation_id: i64) -> Result<bool> {
        let holder = format!("delete-{}", Uuid::new_v4());
        let Some(handle) = self.guard.try_acquire(adaptation_id, &holder).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_adaptation(adaptation_id).await;
        if deleted.is_err() {
            self.guard.release(handle).await?;
        }
        deleted?;
        self.active.write().unwrap().remove(&adaptation_id);
        tracing::info!(adaptation_id, "adaptation deleted");
        Ok(true)
    }
}
