use crate::error::{ErrorKind, IngestError};
use crate::store::{persist_track, PersistReport, SubtitleStore};
use crate::subtitle::{normalize_track, SubtitleTrack};
use crate::video_id::{resolve_video_id, VideoId};
use crate::worker::{fetch_track_document, SubtitleWorker};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Steps of one ingestion request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Resolving,
    Fetching,
    Normalizing,
    Persisting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Validating => write!(f, "validating"),
            Stage::Resolving => write!(f, "resolving"),
            Stage::Fetching => write!(f, "fetching"),
            Stage::Normalizing => write!(f, "normalizing"),
            Stage::Persisting => write!(f, "persisting"),
        }
    }
}

/// Timing for one request.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestStats {
    #[serde(serialize_with = "serialize_millis")]
    pub fetch_time: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub persist_time: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub total_time: Duration,
}

/// Terminal result of one ingestion request.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Every segment was written (new or already present).
    Done {
        video_id: VideoId,
        track: SubtitleTrack,
        report: PersistReport,
        stats: IngestStats,
    },
    /// The worker reported no usable subtitles; nothing was written.
    DoneEmpty {
        video_id: VideoId,
        stats: IngestStats,
    },
    /// Persistence stopped part way; `report.written` rows are stored.
    DoneWithErrors {
        video_id: VideoId,
        track: SubtitleTrack,
        report: PersistReport,
        stats: IngestStats,
    },
    Failed {
        stage: Stage,
        #[serde(serialize_with = "serialize_error")]
        error: IngestError,
        stats: IngestStats,
    },
}

impl IngestOutcome {
    /// `Done` and `DoneEmpty` are successes; everything else needs attention.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Done { .. } | IngestOutcome::DoneEmpty { .. }
        )
    }

    pub fn video_id(&self) -> Option<&VideoId> {
        match self {
            IngestOutcome::Done { video_id, .. }
            | IngestOutcome::DoneEmpty { video_id, .. }
            | IngestOutcome::DoneWithErrors { video_id, .. } => Some(video_id),
            IngestOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&IngestError> {
        match self {
            IngestOutcome::Failed { error, .. } => Some(error),
            IngestOutcome::DoneWithErrors { report, .. } => report.failure.as_ref(),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(IngestError::kind)
    }

    pub fn report(&self) -> Option<&PersistReport> {
        match self {
            IngestOutcome::Done { report, .. } | IngestOutcome::DoneWithErrors { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> &IngestStats {
        match self {
            IngestOutcome::Done { stats, .. }
            | IngestOutcome::DoneEmpty { stats, .. }
            | IngestOutcome::DoneWithErrors { stats, .. }
            | IngestOutcome::Failed { stats, .. } => stats,
        }
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

fn serialize_error<S: Serializer>(e: &IngestError, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct ErrorView {
        kind: ErrorKind,
        message: String,
    }
    ErrorView {
        kind: e.kind(),
        message: e.to_string(),
    }
    .serialize(serializer)
}

/// Runs the ingestion pipeline against a worker and a store.
pub struct Ingestor {
    worker: Arc<dyn SubtitleWorker>,
    store: Arc<dyn SubtitleStore>,
    show_progress: bool,
}

impl Ingestor {
    pub fn new(worker: Arc<dyn SubtitleWorker>, store: Arc<dyn SubtitleStore>) -> Self {
        Self {
            worker,
            store,
            show_progress: false,
        }
    }

    /// Enable or disable the progress bar for batch ingestion.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn store(&self) -> &Arc<dyn SubtitleStore> {
        &self.store
    }

    /// Ingest one source URL. Never panics and never retries.
    pub async fn ingest(&self, source_url: &str) -> IngestOutcome {
        ingest(self.worker.as_ref(), self.store.as_ref(), source_url).await
    }

    /// Ingest several URLs with at most `concurrency` requests in flight.
    ///
    /// Outcomes are returned in input order.
    pub async fn ingest_many(&self, urls: &[String], concurrency: usize) -> Vec<IngestOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }

        let concurrency = concurrency.max(1);
        info!(
            "Ingesting {} sources with {} concurrent requests",
            urls.len(),
            concurrency
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(urls.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} videos ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut futures = FuturesUnordered::new();

        for (index, url) in urls.iter().enumerate() {
            let sem = semaphore.clone();
            let pb = progress_bar.clone();
            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");
                let outcome = self.ingest(url).await;
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
                (index, outcome)
            });
        }

        let mut results: Vec<(usize, IngestOutcome)> = Vec::with_capacity(urls.len());
        while let Some(result) = futures.next().await {
            results.push(result);
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Ingestion complete");
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Run `Validating -> Resolving -> Fetching -> Normalizing -> Persisting` once.
pub async fn ingest(
    worker: &dyn SubtitleWorker,
    store: &dyn SubtitleStore,
    source_url: &str,
) -> IngestOutcome {
    let start_time = Instant::now();
    let mut stats = IngestStats::default();

    let failed = |stage: Stage, error: IngestError, mut stats: IngestStats| {
        stats.total_time = start_time.elapsed();
        warn!("Ingestion of '{}' failed while {}: {}", source_url, stage, error);
        IngestOutcome::Failed {
            stage,
            error,
            stats,
        }
    };

    debug!("{}: '{}'", Stage::Validating, source_url);
    if source_url.trim().is_empty() {
        return failed(
            Stage::Validating,
            IngestError::InvalidSource("source URL is empty".to_string()),
            stats,
        );
    }

    debug!("{}: '{}'", Stage::Resolving, source_url);
    let video_id = match resolve_video_id(source_url) {
        Ok(id) => id,
        Err(e) => return failed(Stage::Resolving, e, stats),
    };

    info!("Fetching subtitles for {} with {}", video_id, worker.name());
    let fetch_start = Instant::now();
    let document = match fetch_track_document(worker, &video_id).await {
        Ok(doc) => doc,
        Err(e) => {
            stats.fetch_time = fetch_start.elapsed();
            return failed(Stage::Fetching, e, stats);
        }
    };
    stats.fetch_time = fetch_start.elapsed();

    debug!("{}: {} languages from worker", Stage::Normalizing, document.len());
    let track = match normalize_track(document) {
        Ok(track) => track,
        Err(e) => return failed(Stage::Normalizing, e, stats),
    };

    if track.is_empty() {
        stats.total_time = start_time.elapsed();
        info!("No subtitles available for {}", video_id);
        return IngestOutcome::DoneEmpty { video_id, stats };
    }

    info!(
        "Persisting {} segments in {} languages for {} to {}",
        track.segment_count(),
        track.language_count(),
        video_id,
        store.name()
    );
    let persist_start = Instant::now();
    let report = persist_track(store, &video_id, &track).await;
    stats.persist_time = persist_start.elapsed();
    stats.total_time = start_time.elapsed();

    if report.failure.is_some() {
        warn!(
            "Ingestion of {} finished with errors: {}/{} segments written",
            video_id, report.written, report.attempted
        );
        IngestOutcome::DoneWithErrors {
            video_id,
            track,
            report,
            stats,
        }
    } else {
        info!(
            "Ingested {} in {:.2}s ({} new rows)",
            video_id,
            stats.total_time.as_secs_f64(),
            report.inserted
        );
        IngestOutcome::Done {
            video_id,
            track,
            report,
            stats,
        }
    }
}

/// Print a human-readable summary of one outcome.
pub fn print_summary(source_url: &str, outcome: &IngestOutcome) {
    println!();
    println!("  Source:     {}", source_url);
    match outcome {
        IngestOutcome::Done {
            video_id,
            track,
            report,
            stats,
        } => {
            println!("  Video:      {}", video_id);
            println!("  Status:     done");
            println!(
                "  Languages:  {}",
                track.languages().collect::<Vec<_>>().join(", ")
            );
            println!(
                "  Segments:   {} written ({} new, {} already stored)",
                report.written,
                report.inserted,
                report.ignored()
            );
            println!("  Total:      {:.2}s", stats.total_time.as_secs_f64());
        }
        IngestOutcome::DoneEmpty { video_id, stats } => {
            println!("  Video:      {}", video_id);
            println!("  Status:     no subtitles available");
            println!("  Total:      {:.2}s", stats.total_time.as_secs_f64());
        }
        IngestOutcome::DoneWithErrors {
            video_id, report, ..
        } => {
            println!("  Video:      {}", video_id);
            println!("  Status:     done with errors");
            println!(
                "  Segments:   {}/{} written ({} new)",
                report.written, report.attempted, report.inserted
            );
            if let Some(ref e) = report.failure {
                println!("  Error:      {}", e);
            }
            println!("  Note:       re-running is safe; stored rows are skipped");
        }
        IngestOutcome::Failed { stage, error, .. } => {
            println!("  Status:     failed while {}", stage);
            println!("  Error:      [{}] {}", error.kind(), error);
        }
    }
}
