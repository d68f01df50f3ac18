//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Chapter writes can be made to fail on demand, which is how the
//! persist-failure path is exercised without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ActiveRunPointer, Chapter, LockRow, NewRun, Run, RunCompletion, RunMeta, RunStatus,
};
use crate::text::content_hash;

use super::Store;

/// In-memory store for tests and embedding.
pub struct InMemoryStore {
    runs: RwLock<Vec<Run>>,
    pointers: RwLock<HashMap<i64, ActiveRunPointer>>,
    locks: RwLock<HashMap<i64, LockRow>>,
    chapters: RwLock<HashMap<i64, Vec<Chapter>>>,
    fail_chapter_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(Vec::new()),
            pointers: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
            chapters: RwLock::new(HashMap::new()),
            fail_chapter_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent [`Store::replace_chapters`] call fail.
    pub fn set_chapter_writes_failing(&self, failing: bool) {
        self.fail_chapter_writes.store(failing, Ordering::SeqCst);
    }

    /// Number of runs recorded for an adaptation.
    pub fn run_count(&self, adaptation_id: i64) -> usize {
        self.runs
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.adaptation_id == adaptation_id)
            .count()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_run(&self, run: &NewRun) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if runs.iter().any(|r| r.run_id == run.run_id) {
            bail!("run {} already exists", run.run_id);
        }
        runs.push(Run {
            run_id: run.run_id.clone(),
            adaptation_id: run.adaptation_id,
            detected_count: run.detected_count,
            target_count: run.target_count,
            started_at: run.started_at,
            finished_at: None,
            duration_ms: None,
            operations: Vec::new(),
            final_map: Vec::new(),
            status: RunStatus::Running,
            error: None,
            meta: RunMeta::default(),
        });
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> Result<bool> {
        let mut runs = self.runs.write().unwrap();
        let Some(run) = runs
            .iter_mut()
            .find(|r| r.run_id == run_id && r.status == RunStatus::Running)
        else {
            return Ok(false);
        };
        run.finished_at = Some(completion.finished_at);
        run.detected_count = completion.detected_count;
        run.target_count = completion.target_count;
        run.duration_ms = Some(completion.duration_ms);
        run.operations = completion.operations.clone();
        run.final_map = completion.final_map.clone();
        run.status = completion.status;
        run.error = completion.error.as_ref().map(|e| e.code().to_string());
        run.meta = completion.meta.clone();
        Ok(true)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let runs = self.runs.read().unwrap();
        Ok(runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn get_last_run(&self, adaptation_id: i64) -> Result<Option<Run>> {
        let runs = self.runs.read().unwrap();
        // `max_by_key` keeps the last of equal keys, i.e. the latest insert.
        Ok(runs
            .iter()
            .filter(|r| r.adaptation_id == adaptation_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn upsert_active_pointer(&self, pointer: &ActiveRunPointer) -> Result<()> {
        let mut pointers = self.pointers.write().unwrap();
        pointers.insert(pointer.adaptation_id, pointer.clone());
        Ok(())
    }

    async fn clear_active_pointer(&self, adaptation_id: i64, run_id: &str) -> Result<()> {
        let mut pointers = self.pointers.write().unwrap();
        if pointers
            .get(&adaptation_id)
            .is_some_and(|p| p.run_id == run_id)
        {
            pointers.remove(&adaptation_id);
        }
        Ok(())
    }

    async fn get_active_pointer(&self, adaptation_id: i64) -> Result<Option<ActiveRunPointer>> {
        let pointers = self.pointers.read().unwrap();
        Ok(pointers.get(&adaptation_id).cloned())
    }

    async fn try_insert_lock(
        &self,
        adaptation_id: i64,
        holder: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut locks = self.locks.write().unwrap();
        if locks.contains_key(&adaptation_id) {
            return Ok(false);
        }
        locks.insert(
            adaptation_id,
            LockRow {
                adaptation_id,
                holder: holder.to_string(),
                acquired_at,
            },
        );
        Ok(true)
    }

    async fn delete_lock(&self, adaptation_id: i64, holder: &str) -> Result<()> {
        let mut locks = self.locks.write().unwrap();
        if locks
            .get(&adaptation_id)
            .is_some_and(|l| l.holder == holder)
        {
            locks.remove(&adaptation_id);
        }
        Ok(())
    }

    async fn get_lock(&self, adaptation_id: i64) -> Result<Option<LockRow>> {
        let locks = self.locks.read().unwrap();
        Ok(locks.get(&adaptation_id).cloned())
    }

    async fn get_chapters(&self, adaptation_id: i64) -> Result<Vec<Chapter>> {
        let chapters = self.chapters.read().unwrap();
        Ok(chapters.get(&adaptation_id).cloned().unwrap_or_default())
    }

    async fn replace_chapters(&self, adaptation_id: i64, texts: &[String]) -> Result<()> {
        if self.fail_chapter_writes.load(Ordering::SeqCst) {
            bail!("chapter write failed for adaptation {}", adaptation_id);
        }
        let fresh: Vec<Chapter> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chapter {
                chapter_number: i as i64 + 1,
                text: text.clone(),
                hash: content_hash(text),
            })
            .collect();
        let mut chapters = self.chapters.write().unwrap();
        chapters.insert(adaptation_id, fresh);
        Ok(())
    }

    async fn delete_adaptation(&self, adaptation_id: i64) -> Result<()> {
        self.chapters.write().unwrap().remove(&adaptation_id);
        self.runs
            .write()
            .unwrap()
            .retain(|r| r.adaptation_id != adaptation_id);
        self.pointers.write().unwrap().remove(&adaptation_id);
        self.locks.write().unwrap().remove(&adaptation_id);
        Ok(())
    }
}
