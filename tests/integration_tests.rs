//! Integration tests for subingest
//!
//! These drive the full pipeline with a canned worker and a real SQLite store,
//! so the uniqueness key is enforced exactly as in production.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use subingest::store::{SqliteStore, StoreSession, SubtitleStore};
use subingest::subtitle::SubtitleSegment;
use subingest::worker::{SubtitleWorker, WorkerOutput};
use subingest::{ErrorKind, IngestError, IngestOutcome, Ingestor, Result, Stage, VideoId};

const RICK: &str = "https://youtu.be/dQw4w9WgXcQ";

// ============================================================================
// Test doubles
// ============================================================================

/// Returns the same output for every video and counts invocations.
struct FakeWorker {
    output: WorkerOutput,
    calls: AtomicUsize,
}

impl FakeWorker {
    fn json(stdout: &str) -> Self {
        Self::with_output(stdout, "", Some(0))
    }

    fn with_output(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Self {
        Self {
            output: WorkerOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code,
            },
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubtitleWorker for FakeWorker {
    async fn invoke(&self, _video_id: &VideoId) -> Result<WorkerOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Wraps a store and fails every write after the first `limit` ones.
struct FlakyStore {
    inner: SqliteStore,
    limit: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn new(inner: SqliteStore, limit: usize) -> Self {
        Self {
            inner,
            limit: Arc::new(AtomicUsize::new(limit)),
        }
    }
}

struct FlakySession {
    inner: Box<dyn StoreSession>,
    remaining: Arc<AtomicUsize>,
}

#[async_trait]
impl SubtitleStore for FlakyStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(FlakySession {
            inner: self.inner.acquire().await?,
            remaining: self.limit.clone(),
        }))
    }

    async fn count_rows(&self, video_id: &VideoId) -> Result<u64> {
        self.inner.count_rows(video_id).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[async_trait]
impl StoreSession for FlakySession {
    async fn insert_or_ignore(
        &mut self,
        video_id: &VideoId,
        segment: &SubtitleSegment,
    ) -> Result<bool> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(IngestError::StoreWriteError(
                "connection reset by peer".to_string(),
            ));
        }
        self.inner.insert_or_ignore(video_id, segment).await
    }
}

/// Counts sessions handed out so tests can assert the store was never touched.
struct CountingStore {
    inner: SqliteStore,
    acquired: AtomicUsize,
}

#[async_trait]
impl SubtitleStore for CountingStore {
    async fn acquire(&self) -> Result<Box<dyn StoreSession>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire().await
    }

    async fn count_rows(&self, video_id: &VideoId) -> Result<u64> {
        self.inner.count_rows(video_id).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn rick() -> VideoId {
    VideoId::parse("dQw4w9WgXcQ").unwrap()
}

fn four_segments() -> &'static str {
    r#"{
        "en": [
            {"start": 0.0, "duration": 2.5, "text": "Hello"},
            {"start": 2.5, "duration": 1.0, "text": "again"}
        ],
        "ja": [
            {"start": 0.0, "duration": 2.5, "text": "こんにちは"},
            {"start": 2.5, "duration": 1.0, "text": "また"}
        ]
    }"#
}

// ============================================================================
// End-to-end
// ============================================================================

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_segment_is_persisted() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let worker = Arc::new(FakeWorker::json(
            r#"{"en":[{"start":0.0,"duration":2.5,"text":"Hello"}]}"#,
        ));
        let ingestor = Ingestor::new(worker.clone(), store.clone());

        let outcome = ingestor.ingest(RICK).await;

        match &outcome {
            IngestOutcome::Done {
                video_id,
                track,
                report,
                ..
            } => {
                assert_eq!(video_id.as_str(), "dQw4w9WgXcQ");
                assert_eq!(track.segment_count(), 1);
                assert_eq!(report.inserted, 1);
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert!(outcome.is_success());
        assert_eq!(worker.calls(), 1);

        let rows = store.rows(&rick()).await.unwrap();
        assert_eq!(
            rows,
            vec![SubtitleSegment {
                language: "en".to_string(),
                start_ms: 0,
                duration_ms: 2500,
                text: "Hello".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_outcome_json_shape() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let worker = Arc::new(FakeWorker::json(
            r#"{"en":[{"start":0.0,"duration":2.5,"text":"Hello"}]}"#,
        ));
        let outcome = Ingestor::new(worker, store).ingest(RICK).await;

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "done");
        assert_eq!(json["video_id"], "dQw4w9WgXcQ");
        assert_eq!(json["track"]["en"][0]["duration_ms"], 2500);
        assert_eq!(json["report"]["written"], 1);
        assert!(json["report"]["failure"].is_null());
    }
}

// ============================================================================
// Idempotence
// ============================================================================

mod idempotence_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_run_adds_no_rows() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let worker = Arc::new(FakeWorker::json(four_segments()));
        let ingestor = Ingestor::new(worker, store.clone());

        let first = ingestor.ingest(RICK).await;
        let after_first = store.count_rows(&rick()).await.unwrap();
        let second = ingestor
            .ingest("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await;
        let after_second = store.count_rows(&rick()).await.unwrap();

        assert_eq!(after_first, 4);
        assert_eq!(after_second, after_first);
        assert_eq!(first.report().unwrap().inserted, 4);
        let second_report = second.report().unwrap();
        assert!(second.is_success());
        assert_eq!(second_report.written, 4);
        assert_eq!(second_report.inserted, 0);
    }

    #[tokio::test]
    async fn test_first_write_wins_on_divergent_text() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let original = Arc::new(FakeWorker::json(
            r#"{"en":[{"start":1.0,"duration":1.0,"text":"original"}]}"#,
        ));
        Ingestor::new(original, store.clone()).ingest(RICK).await;

        let rerun = Arc::new(FakeWorker::json(
            r#"{"en":[{"start":1.0,"duration":3.0,"text":"rewritten"}]}"#,
        ));
        let outcome = Ingestor::new(rerun, store.clone()).ingest(RICK).await;
        assert!(outcome.is_success());

        let rows = store.rows(&rick()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "original");
        assert_eq!(rows[0].duration_ms, 1000);
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_of_same_video() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let worker = Arc::new(FakeWorker::json(four_segments()));
        let ingestor = Ingestor::new(worker.clone(), store.clone());

        let urls: Vec<String> = vec![
            RICK.to_string(),
            "https://www.youtube.com/embed/dQw4w9WgXcQ".to_string(),
            "dQw4w9WgXcQ".to_string(),
        ];
        let outcomes = ingestor.ingest_many(&urls, 3).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(IngestOutcome::is_success));
        assert_eq!(worker.calls(), 3);
        assert_eq!(store.count_rows(&rick()).await.unwrap(), 4);

        let inserted: usize = outcomes
            .iter()
            .map(|o| o.report().unwrap().inserted)
            .sum();
        assert_eq!(inserted, 4, "each row is created exactly once");
    }
}

// ============================================================================
// Partial failure
// ============================================================================

mod partial_failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_after_n_writes_reports_n() {
        let sqlite = SqliteStore::in_memory().unwrap();
        let flaky = Arc::new(FlakyStore::new(sqlite.clone(), 2));
        let worker = Arc::new(FakeWorker::json(four_segments()));

        let outcome = Ingestor::new(worker.clone(), flaky).ingest(RICK).await;

        match &outcome {
            IngestOutcome::DoneWithErrors { report, .. } => {
                assert_eq!(report.attempted, 4);
                assert_eq!(report.written, 2);
                assert!(matches!(
                    report.failure,
                    Some(IngestError::StoreWriteError(_))
                ));
            }
            other => panic!("Expected DoneWithErrors, got {other:?}"),
        }
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::StoreWriteError));
        assert_eq!(sqlite.count_rows(&rick()).await.unwrap(), 2);

        // Re-ingesting against a healthy store fills the gap.
        let healthy = Arc::new(sqlite.clone());
        let retry = Ingestor::new(worker, healthy).ingest(RICK).await;
        assert!(retry.is_success());
        assert_eq!(retry.report().unwrap().inserted, 2);
        assert_eq!(sqlite.count_rows(&rick()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failure_before_any_write() {
        let sqlite = SqliteStore::in_memory().unwrap();
        let flaky = Arc::new(FlakyStore::new(sqlite.clone(), 0));
        let worker = Arc::new(FakeWorker::json(four_segments()));

        let outcome = Ingestor::new(worker, flaky).ingest(RICK).await;

        let report = outcome.report().expect("persist report");
        assert_eq!(report.written, 0);
        assert!(matches!(outcome, IngestOutcome::DoneWithErrors { .. }));
        assert_eq!(sqlite.count_rows(&rick()).await.unwrap(), 0);
    }
}

// ============================================================================
// Failure taxonomy
// ============================================================================

mod failure_tests {
    use super::*;

    async fn run(worker: FakeWorker, url: &str) -> (IngestOutcome, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            inner: SqliteStore::in_memory().unwrap(),
            acquired: AtomicUsize::new(0),
        });
        let outcome = Ingestor::new(Arc::new(worker), store.clone())
            .ingest(url)
            .await;
        (outcome, store)
    }

    #[tokio::test]
    async fn test_empty_url_fails_validation() {
        let worker = Arc::new(FakeWorker::json("{}"));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ingestor = Ingestor::new(worker.clone(), store);
        for url in ["", "   "] {
            let outcome = ingestor.ingest(url).await;
            assert!(matches!(
                outcome,
                IngestOutcome::Failed {
                    stage: Stage::Validating,
                    error: IngestError::InvalidSource(_),
                    ..
                }
            ));
        }
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_url_never_runs_worker() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let worker = Arc::new(FakeWorker::json("{}"));
        let outcome = Ingestor::new(worker.clone(), store)
            .ingest("https://example.com/video/123")
            .await;

        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                stage: Stage::Resolving,
                ..
            }
        ));
        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidSource));
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_mapping_is_done_empty_without_store_access() {
        let (outcome, store) = run(FakeWorker::json("{}"), RICK).await;
        assert!(matches!(outcome, IngestOutcome::DoneEmpty { .. }));
        assert!(outcome.is_success());
        assert_eq!(store.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_only_segments_are_done_empty() {
        let (outcome, store) = run(
            FakeWorker::json(r#"{"en":[{"start":0,"duration":1,"text":"  "}]}"#),
            RICK,
        )
        .await;
        assert!(matches!(outcome, IngestOutcome::DoneEmpty { .. }));
        assert_eq!(store.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_failure_is_terminal() {
        let (outcome, store) = run(
            FakeWorker::with_output("", "TranscriptsDisabled", Some(1)),
            RICK,
        )
        .await;
        match &outcome {
            IngestOutcome::Failed {
                stage: Stage::Fetching,
                error: IngestError::WorkerFailure { stderr, .. },
                ..
            } => assert_eq!(stderr, "TranscriptsDisabled"),
            other => panic!("Expected WorkerFailure, got {other:?}"),
        }
        assert_eq!(store.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_malformed() {
        let (outcome, _) = run(FakeWorker::json("Traceback (most recent call last)"), RICK).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                stage: Stage::Fetching,
                error: IngestError::MalformedOutput(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_segment_fails_normalization() {
        let (outcome, store) = run(
            FakeWorker::json(r#"{"en":[{"start":-1.0,"duration":1.0,"text":"x"}]}"#),
            RICK,
        )
        .await;
        assert!(matches!(
            outcome,
            IngestOutcome::Failed {
                stage: Stage::Normalizing,
                error: IngestError::MalformedOutput(_),
                ..
            }
        ));
        assert_eq!(store.acquired.load(Ordering::SeqCst), 0);
    }
}
