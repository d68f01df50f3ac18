//! End-to-end run tests against the in-memory store.
//!
//! These cover the run lifecycle: success, empty input, persist failure,
//! lock contention, cooldown, strict keep-original refusal, stale-run
//! reaping, orphaned lock recovery and panic recovery.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use chapmap::config::{DetectionConfig, RunsConfig};
use chapmap::orchestrator::{
    NormalizationRequest, Orchestrator, Page, RunResult, TargetCountSource,
};
use chapmap_core::error::RunError;
use chapmap_core::models::{
    ActiveRunPointer, Chapter, DetectionMethod, LockRow, Mode, NewRun, Operation, ReadingAge, Rule,
    Run, RunCompletion, RunStage, RunStatus,
};
use chapmap_core::store::memory::InMemoryStore;
use chapmap_core::store::Store;

const ADAPTATION: i64 = 42;

fn runs(max_ops: usize, cooldown: u64) -> RunsConfig {
    RunsConfig {
        max_ops,
        stale_run_timeout_secs: 1800,
        reprocess_cooldown_secs: cooldown,
    }
}

fn orchestrator(store: Arc<InMemoryStore>, runs: RunsConfig) -> Orchestrator {
    Orchestrator::new(store, runs, DetectionConfig::default())
}

/// A book with `n` "CHAPTER k" headers, 35 body lines apart.
fn chaptered_book(n: usize) -> String {
    let mut lines = vec!["A Test Book".to_string(), String::new()];
    for k in 1..=n {
        lines.push(format!("CHAPTER {}", k));
        lines.push(String::new());
        for j in 0..35 {
            lines.push(format!("Line {} of chapter {} has some words.", j, k));
        }
    }
    lines.join("\n")
}

/// Plain paragraphs with no chapter structure.
fn paragraphs(n: usize, words: usize) -> String {
    let para = vec!["story"; words].join(" ");
    vec![para; n].join("\n\n")
}

fn request(mode: Mode, target: TargetCountSource, text: String) -> NormalizationRequest {
    NormalizationRequest {
        adaptation_id: ADAPTATION,
        mode,
        target,
        text,
    }
}

#[tokio::test]
async fn test_keep_original_with_trusted_count() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(17),
            chaptered_book(26),
        ))
        .await;

    match &result {
        RunResult::Succeeded {
            detector,
            detected_count,
            target_count,
            ..
        } => {
            assert_eq!(*detector, DetectionMethod::Regex);
            assert_eq!(*detected_count, 26);
            assert_eq!(*target_count, 17);
        }
        other => panic!("expected success, got {:?}", other),
    }

    let chapters = store.get_chapters(ADAPTATION).await.unwrap();
    assert_eq!(chapters.len(), 17);
    assert_eq!(
        chapters.iter().map(|c| c.chapter_number).collect::<Vec<_>>(),
        (1..=17).collect::<Vec<i64>>()
    );

    let view = orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, RunStatus::Succeeded);
    assert_eq!(view.detector, Some(DetectionMethod::Regex));
    assert_eq!(view.rule, Some(Rule::StrictKeepOriginal));
    assert_eq!(view.pattern.as_deref(), Some("numeric_simple"));
    assert_eq!(view.final_map_total, 17);
    assert_eq!(view.operations_total, 10);
    assert!(view.operations[0].is_summary());
    assert_eq!(view.active_stage, None);

    let mut covered: Vec<usize> = view
        .final_map
        .iter()
        .flat_map(|e| e.source_indices.clone())
        .collect();
    covered.sort_unstable();
    covered.dedup();
    assert_eq!(covered, (0..26).collect::<Vec<_>>());

    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());
    assert!(orch.in_flight().is_empty());
}

#[tokio::test]
async fn test_empty_input_never_succeeds() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(5),
            "no chapters in here at all".to_string(),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::EmptyInput));
    assert!(result.run_id().is_some());

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("empty_input"));
    assert_eq!(run.detected_count, 0);
    assert!(store.get_chapters(ADAPTATION).await.unwrap().is_empty());
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());

    // Same outcome for blank text in auto mode.
    let result = orch
        .start_normalization(request(
            Mode::AutoWordcount,
            TargetCountSource::Unspecified,
            "   \n\n  ".to_string(),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::EmptyInput));
}

#[tokio::test]
async fn test_persist_failure_keeps_previous_chapters() {
    let store = Arc::new(InMemoryStore::new());
    store
        .replace_chapters(ADAPTATION, &["keep".to_string()])
        .await
        .unwrap();
    store.set_chapter_writes_failing(true);
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let result = orch
        .start_normalization(request(
            Mode::AutoWordcount,
            TargetCountSource::WordBudget(ReadingAge::Preschool),
            paragraphs(20, 100),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::PersistFailed));

    let chapters = store.get_chapters(ADAPTATION).await.unwrap();
    assert_eq!(
        chapters.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
        vec!["keep"]
    );

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("persist_failed"));
    // The audit trail is still written: one final chapter, as before.
    assert_eq!(run.target_count, 1);
    assert_eq!(run.final_map.len(), 1);
    assert!(run.operations[0].is_summary());
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
}

#[tokio::test]
async fn test_busy_lock_rejects_without_mutation() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let first = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(4),
            chaptered_book(4),
        ))
        .await;
    assert!(matches!(first, RunResult::Succeeded { .. }));
    let before = store.get_chapters(ADAPTATION).await.unwrap();

    assert!(store
        .try_insert_lock(ADAPTATION, "other-run", Utc::now())
        .await
        .unwrap());

    let second = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(2),
            chaptered_book(6),
        ))
        .await;
    assert_eq!(
        second,
        RunResult::Rejected {
            error: RunError::RunInProgress {
                holder_run_id: Some("other-run".to_string())
            }
        }
    );

    assert_eq!(store.run_count(ADAPTATION), 1);
    assert_eq!(store.get_chapters(ADAPTATION).await.unwrap(), before);
    // The foreign lock is untouched.
    assert_eq!(
        store.get_lock(ADAPTATION).await.unwrap().unwrap().holder,
        "other-run"
    );
}

#[tokio::test]
async fn test_cooldown_rejects_resubmission() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 60));

    let first = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(3),
            chaptered_book(3),
        ))
        .await;
    assert!(matches!(first, RunResult::Succeeded { .. }));

    let second = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(3),
            chaptered_book(3),
        ))
        .await;
    match second.error() {
        Some(RunError::RateLimited { wait_seconds }) => {
            assert!((1..=60).contains(wait_seconds));
        }
        other => panic!("expected rate_limited, got {:?}", other),
    }
    assert!(second.error().unwrap().is_retryable());
    assert_eq!(store.run_count(ADAPTATION), 1);

    // Other adaptations are not throttled.
    let other = orch
        .start_normalization(NormalizationRequest {
            adaptation_id: ADAPTATION + 1,
            mode: Mode::KeepOriginal,
            target: TargetCountSource::ChapterCount(3),
            text: chaptered_book(3),
        })
        .await;
    assert!(matches!(other, RunResult::Succeeded { .. }));
}

#[tokio::test]
async fn test_operation_log_is_capped_with_summary_first() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(3, 0));

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(17),
            chaptered_book(26),
        ))
        .await;
    assert!(matches!(result, RunResult::Succeeded { .. }));

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.operations.len(), 3);
    match &run.operations[0] {
        Operation::Summary {
            merge_ops,
            split_ops,
            detected_count,
            target_count,
            ..
        } => {
            assert_eq!(*merge_ops, 9);
            assert_eq!(*split_ops, 0);
            assert_eq!(*detected_count, 26);
            assert_eq!(*target_count, 17);
        }
        other => panic!("expected summary head, got {:?}", other),
    }
    assert!(matches!(run.operations[1], Operation::Merge { .. }));
    assert_eq!(run.meta.merge_ops, 9);
    assert_eq!(run.final_map.len(), 17);
}

#[tokio::test]
async fn test_keep_original_without_count_is_refused() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::Unspecified,
            chaptered_book(5),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::NoOriginalChapterCount));

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("no_original_chapter_count"));
    assert_eq!(run.detected_count, 0);
    assert_eq!(run.target_count, 0);
    assert_eq!(run.meta.rule, Some(Rule::StrictKeepOriginal));
    assert!(store.get_chapters(ADAPTATION).await.unwrap().is_empty());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());

    // A word budget alone does not count as a trusted chapter count.
    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::WordBudget(ReadingAge::MiddleGrade),
            chaptered_book(5),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::NoOriginalChapterCount));
}

#[tokio::test]
async fn test_existing_chapter_count_is_the_target() {
    let store = Arc::new(InMemoryStore::new());
    let existing: Vec<String> = (1..=3).map(|i| format!("old chapter {}", i)).collect();
    store.replace_chapters(ADAPTATION, &existing).await.unwrap();
    let orch = orchestrator(store.clone(), runs(2000, 0));

    // Keep-original is allowed without a count once chapters exist.
    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::Unspecified,
            chaptered_book(8),
        ))
        .await;
    match result {
        RunResult::Succeeded {
            detected_count,
            target_count,
            ..
        } => {
            assert_eq!(detected_count, 8);
            assert_eq!(target_count, 3);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(store.get_chapters(ADAPTATION).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_auto_wordcount_targets_detected_count() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));

    let result = orch
        .start_normalization(request(
            Mode::AutoWordcount,
            TargetCountSource::WordBudget(ReadingAge::Preschool),
            paragraphs(20, 100),
        ))
        .await;
    match result {
        RunResult::Succeeded {
            detector,
            detected_count,
            target_count,
            ..
        } => {
            assert_eq!(detector, DetectionMethod::AutoWordcount);
            assert_eq!(detected_count, 4);
            assert_eq!(target_count, 4);
        }
        other => panic!("expected success, got {:?}", other),
    }
    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.meta.rule, Some(Rule::AutoWordcount));
    assert_eq!(run.operations.len(), 1);
}

#[tokio::test]
async fn test_identical_inputs_give_identical_runs() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone(), runs(2000, 0));
        orch.start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(17),
            chaptered_book(26),
        ))
        .await;
        let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
        let chapters = store.get_chapters(ADAPTATION).await.unwrap();
        outcomes.push((run.operations, run.final_map, chapters));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn test_stale_run_is_reaped_on_read() {
    let store = Arc::new(InMemoryStore::new());
    let started = Utc::now() - Duration::hours(2);
    store
        .create_run(&NewRun {
            run_id: "stuck".into(),
            adaptation_id: ADAPTATION,
            detected_count: 4,
            target_count: 4,
            started_at: started,
        })
        .await
        .unwrap();
    store
        .try_insert_lock(ADAPTATION, "stuck", started)
        .await
        .unwrap();
    store
        .upsert_active_pointer(&ActiveRunPointer {
            adaptation_id: ADAPTATION,
            run_id: "stuck".into(),
            stage: RunStage::Normalizing,
            updated_at: started,
        })
        .await
        .unwrap();

    let orch = orchestrator(store.clone(), runs(2000, 0));
    let view = orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.run_id, "stuck");
    assert_eq!(view.status, RunStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("run_abandoned"));
    assert_eq!(view.active_stage, None);
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());

    // The adaptation is usable again.
    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(2),
            chaptered_book(2),
        ))
        .await;
    assert!(matches!(result, RunResult::Succeeded { .. }));
}

#[tokio::test]
async fn test_fresh_running_run_is_not_reaped() {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_run(&NewRun {
            run_id: "busy".into(),
            adaptation_id: ADAPTATION,
            detected_count: 1,
            target_count: 1,
            started_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .upsert_active_pointer(&ActiveRunPointer {
            adaptation_id: ADAPTATION,
            run_id: "busy".into(),
            stage: RunStage::Persisting,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let orch = orchestrator(store, runs(2000, 0));
    let view = orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, RunStatus::Running);
    assert_eq!(view.active_stage, Some(RunStage::Persisting));
    assert_eq!(orch.in_flight(), vec![ADAPTATION]);
}

/// Leave behind what a process killed right after taking the lock leaves:
/// a lock row and a `starting` pointer, both 5 hours old, with no run row.
async fn crashed_after_lock(store: &InMemoryStore) {
    let old = Utc::now() - Duration::hours(6);
    store
        .create_run(&NewRun {
            run_id: "previous".into(),
            adaptation_id: ADAPTATION,
            detected_count: 3,
            target_count: 3,
            started_at: old,
        })
        .await
        .unwrap();
    store
        .finish_run(
            "previous",
            &RunCompletion {
                finished_at: old,
                detected_count: 3,
                target_count: 3,
                duration_ms: 40,
                operations: Vec::new(),
                final_map: Vec::new(),
                status: RunStatus::Succeeded,
                error: None,
                meta: Default::default(),
            },
        )
        .await
        .unwrap();

    let crashed_at = Utc::now() - Duration::hours(5);
    store
        .try_insert_lock(ADAPTATION, "crashed", crashed_at)
        .await
        .unwrap();
    store
        .upsert_active_pointer(&ActiveRunPointer {
            adaptation_id: ADAPTATION,
            run_id: "crashed".into(),
            stage: RunStage::Starting,
            updated_at: crashed_at,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_orphaned_lock_is_recovered_on_read() {
    let store = Arc::new(InMemoryStore::new());
    crashed_after_lock(&store).await;
    let orch = orchestrator(store.clone(), runs(2000, 60));

    let view = orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.run_id, "previous");
    assert_eq!(view.status, RunStatus::Succeeded);
    assert_eq!(view.active_stage, None);
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(3),
            chaptered_book(3),
        ))
        .await;
    assert!(matches!(result, RunResult::Succeeded { .. }), "got {:?}", result);
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphaned_lock_is_recovered_on_start() {
    let store = Arc::new(InMemoryStore::new());
    crashed_after_lock(&store).await;
    let orch = orchestrator(store.clone(), runs(2000, 60));

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(2),
            chaptered_book(4),
        ))
        .await;
    match result {
        RunResult::Succeeded { target_count, .. } => assert_eq!(target_count, 2),
        other => panic!("expected success, got {:?}", other),
    }
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());
    assert_eq!(store.run_count(ADAPTATION), 2);
}

#[tokio::test]
async fn test_run_row_is_written_before_detection() {
    let store = Arc::new(PanickingStore::new());
    let orch = Orchestrator::new(store.clone(), runs(2000, 0), DetectionConfig::default());

    // Chapters are the first thing read under the lock.
    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(3),
            chaptered_book(3),
        ))
        .await;
    assert_eq!(*store.status_at_read.lock().unwrap(), Some(RunStatus::Running));
    let run = store
        .get_run(result.run_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.detected_count, 0);
    assert_eq!(run.target_count, 0);
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_counts_are_written_at_completion() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));
    orch.start_normalization(request(
        Mode::KeepOriginal,
        TargetCountSource::ChapterCount(5),
        chaptered_book(7),
    ))
    .await;

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.detected_count, 7);
    assert_eq!(run.target_count, 5);
}

#[tokio::test]
async fn test_huge_stale_timeout_never_reaps_fresh_runs() {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_run(&NewRun {
            run_id: "busy".into(),
            adaptation_id: ADAPTATION,
            detected_count: 1,
            target_count: 1,
            started_at: Utc::now(),
        })
        .await
        .unwrap();
    let orch = orchestrator(
        store,
        RunsConfig {
            max_ops: 2000,
            stale_run_timeout_secs: u64::MAX,
            reprocess_cooldown_secs: 0,
        },
    );

    let view = orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, RunStatus::Running);
    assert_eq!(view.error, None);
}

#[tokio::test]
async fn test_status_pagination() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store, runs(2000, 0));
    assert!(orch
        .run_status(ADAPTATION, Page::default())
        .await
        .unwrap()
        .is_none());

    orch.start_normalization(request(
        Mode::KeepOriginal,
        TargetCountSource::ChapterCount(17),
        chaptered_book(26),
    ))
    .await;

    let view = orch
        .run_status(ADAPTATION, Page::new(Some(15), Some(5)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.offset, 15);
    assert_eq!(view.limit, 5);
    assert_eq!(view.final_map_total, 17);
    assert_eq!(view.final_map.len(), 2);
    assert_eq!(view.final_map[0].final_index, 15);
    // The detector comes from the summary even when it is off-page.
    assert_eq!(view.detector, Some(DetectionMethod::Regex));

    assert_eq!(Page::new(Some(-3), Some(5000)), Page { offset: 0, limit: 1000 });
    assert_eq!(Page::new(None, Some(0)).limit, 1);
    assert_eq!(Page::default().limit, 200);
}

/// Delegates to an in-memory store but panics while reading chapters,
/// noting the status of the latest run at that moment.
struct PanickingStore {
    inner: InMemoryStore,
    status_at_read: Mutex<Option<RunStatus>>,
}

impl PanickingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            status_at_read: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Store for PanickingStore {
    async fn create_run(&self, run: &NewRun) -> Result<()> {
        self.inner.create_run(run).await
    }
    async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> Result<bool> {
        self.inner.finish_run(run_id, completion).await
    }
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.inner.get_run(run_id).await
    }
    async fn get_last_run(&self, adaptation_id: i64) -> Result<Option<Run>> {
        self.inner.get_last_run(adaptation_id).await
    }
    async fn upsert_active_pointer(&self, pointer: &ActiveRunPointer) -> Result<()> {
        self.inner.upsert_active_pointer(pointer).await
    }
    async fn clear_active_pointer(&self, adaptation_id: i64, run_id: &str) -> Result<()> {
        self.inner.clear_active_pointer(adaptation_id, run_id).await
    }
    async fn get_active_pointer(&self, adaptation_id: i64) -> Result<Option<ActiveRunPointer>> {
        self.inner.get_active_pointer(adaptation_id).await
    }
    async fn try_insert_lock(
        &self,
        adaptation_id: i64,
        holder: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .try_insert_lock(adaptation_id, holder, acquired_at)
            .await
    }
    async fn delete_lock(&self, adaptation_id: i64, holder: &str) -> Result<()> {
        self.inner.delete_lock(adaptation_id, holder).await
    }
    async fn get_lock(&self, adaptation_id: i64) -> Result<Option<LockRow>> {
        self.inner.get_lock(adaptation_id).await
    }
    async fn get_chapters(&self, adaptation_id: i64) -> Result<Vec<Chapter>> {
        let run = self.inner.get_last_run(adaptation_id).await?;
        *self.status_at_read.lock().unwrap() = run.map(|r| r.status);
        panic!("chapter table unreadable");
    }
    async fn replace_chapters(&self, adaptation_id: i64, texts: &[String]) -> Result<()> {
        self.inner.replace_chapters(adaptation_id, texts).await
    }
    async fn delete_adaptation(&self, adaptation_id: i64) -> Result<()> {
        self.inner.delete_adaptation(adaptation_id).await
    }
}

#[tokio::test]
async fn test_panic_releases_lock_and_records_internal() {
    let store = Arc::new(PanickingStore::new());
    let orch = Orchestrator::new(store.clone(), runs(2000, 0), DetectionConfig::default());

    let result = orch
        .start_normalization(request(
            Mode::KeepOriginal,
            TargetCountSource::ChapterCount(3),
            chaptered_book(3),
        ))
        .await;
    assert_eq!(result.error(), Some(&RunError::Internal));

    let run = store.get_last_run(ADAPTATION).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("internal"));
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
    assert!(store.get_active_pointer(ADAPTATION).await.unwrap().is_none());
    assert!(orch.in_flight().is_empty());
}

#[tokio::test]
async fn test_delete_adaptation() {
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(store.clone(), runs(2000, 0));
    orch.start_normalization(request(
        Mode::KeepOriginal,
        TargetCountSource::ChapterCount(3),
        chaptered_book(3),
    ))
    .await;

    store
        .try_insert_lock(ADAPTATION, "someone", Utc::now())
        .await
        .unwrap();
    assert!(!orch.delete_adaptation(ADAPTATION).await.unwrap());
    assert_eq!(store.get_chapters(ADAPTATION).await.unwrap().len(), 3);

    store.delete_lock(ADAPTATION, "someone").await.unwrap();
    assert!(orch.delete_adaptation(ADAPTATION).await.unwrap());
    assert!(store.get_chapters(ADAPTATION).await.unwrap().is_empty());
    assert_eq!(store.run_count(ADAPTATION), 0);
    assert!(store.get_lock(ADAPTATION).await.unwrap().is_none());
}
