//! Run error taxonomy.
//!
//! Every failed or rejected normalization run is reported with one of these
//! codes. The [`RunError::code`] string is what gets persisted in a run's
//! `error` column and returned to callers; it is stable, lowercase
//! snake_case, and never carries free-text exception messages.

use thiserror::Error;

/// Why a normalization run did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Detection produced zero segments; nothing was mutated.
    #[error("empty_input")]
    EmptyInput,

    /// Keep-original mode with no existing chapters and no trusted chapter
    /// count; refused before any mutation.
    #[error("no_original_chapter_count")]
    NoOriginalChapterCount,

    /// The atomic chapter replacement failed; previous chapters are intact.
    #[error("persist_failed")]
    PersistFailed,

    /// Another run holds the adaptation lock.
    #[error("run_in_progress")]
    RunInProgress { holder_run_id: Option<String> },

    /// The reprocess cooldown has not elapsed yet.
    #[error("rate_limited")]
    RateLimited { wait_seconds: u64 },

    /// A run stuck in `running` past the stale timeout, reaped on read.
    #[error("run_abandoned")]
    RunAbandoned,

    /// Unexpected failure caught at the orchestrator boundary.
    #[error("internal")]
    Internal,
}

impl RunError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::EmptyInput => "empty_input",
            RunError::NoOriginalChapterCount => "no_original_chapter_count",
            RunError::PersistFailed => "persist_failed",
            RunError::RunInProgress { .. } => "run_in_progress",
            RunError::RateLimited { .. } => "rate_limited",
            RunError::RunAbandoned => "run_abandoned",
            RunError::Internal => "internal",
        }
    }

    /// `run_in_progress` and `rate_limited` may be retried with backoff;
    /// everything else needs a fresh run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::RunInProgress { .. } | RunError::RateLimited { .. }
        )
    }
}
