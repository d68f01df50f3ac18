//! Storage abstraction for chapmap.
//!
//! The [`Store`] trait covers every durable record a normalization run
//! touches: run rows, the active-run pointer, the adaptation lock and the
//! chapters themselves. The orchestrator only talks to storage through
//! this trait, so the SQLite backend and the in-memory backend are
//! interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ActiveRunPointer, Chapter, LockRow, NewRun, Run, RunCompletion};

/// Abstract storage backend for chapmap.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_run`](Store::create_run) | Insert a run in `running` state |
/// | [`finish_run`](Store::finish_run) | Single terminal update of a run |
/// | [`get_last_run`](Store::get_last_run) | Most recent run for an adaptation |
/// | [`upsert_active_pointer`](Store::upsert_active_pointer) | Record an in-flight run and its stage |
/// | [`try_insert_lock`](Store::try_insert_lock) | Insert-if-absent adaptation lock |
/// | [`replace_chapters`](Store::replace_chapters) | Atomically swap an adaptation's chapters |
/// | [`delete_adaptation`](Store::delete_adaptation) | Remove everything for an adaptation |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new run with status `running`.
    async fn create_run(&self, run: &NewRun) -> Result<()>;

    /// Move a `running` run to its terminal state, writing its final counts.
    ///
    /// Returns `false` (and writes nothing) when the run does not exist or
    /// is no longer running.
    async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> Result<bool>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

    /// The run with the latest `started_at`; ties go to the latest insert.
    async fn get_last_run(&self, adaptation_id: i64) -> Result<Option<Run>>;

    async fn upsert_active_pointer(&self, pointer: &ActiveRunPointer) -> Result<()>;

    /// Remove the pointer if it still names `run_id`.
    async fn clear_active_pointer(&self, adaptation_id: i64, run_id: &str) -> Result<()>;

    async fn get_active_pointer(&self, adaptation_id: i64) -> Result<Option<ActiveRunPointer>>;

    /// Insert the lock row unless one exists. Never blocks.
    ///
    /// Returns `true` when this call created the row.
    async fn try_insert_lock(
        &self,
        adaptation_id: i64,
        holder: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Remove the lock row if `holder` still holds it.
    async fn delete_lock(&self, adaptation_id: i64, holder: &str) -> Result<()>;

    async fn get_lock(&self, adaptation_id: i64) -> Result<Option<LockRow>>;

    /// Chapters ordered by chapter number.
    async fn get_chapters(&self, adaptation_id: i64) -> Result<Vec<Chapter>>;

    /// Replace all chapters of an adaptation in one transaction.
    ///
    /// On error the previous chapters are left exactly as they were.
    async fn replace_chapters(&self, adaptation_id: i64, texts: &[String]) -> Result<()>;

    /// Delete chapters, runs, pointer and lock of an adaptation in one
    /// transaction.
    async fn delete_adaptation(&self, adaptation_id: i64) -> Result<()>;
}
