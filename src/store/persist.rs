use super::SubtitleStore;
use crate::error::IngestError;
use crate::subtitle::SubtitleTrack;
use crate::video_id::VideoId;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What happened while writing one track.
#[derive(Debug, Default, Serialize)]
pub struct PersistReport {
    /// Segments in the track.
    pub attempted: usize,
    /// Writes that completed, whether they created a row or hit an existing key.
    pub written: usize,
    /// Writes that created a new row.
    pub inserted: usize,
    /// The error that stopped the batch, if any.
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<IngestError>,
}

impl PersistReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.written == self.attempted
    }

    /// Writes that hit an existing key and were discarded.
    pub fn ignored(&self) -> usize {
        self.written - self.inserted
    }
}

fn serialize_failure<S>(failure: &Option<IngestError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match failure {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Write every segment of `track` for `video_id`, one after another.
///
/// There is no enclosing transaction: rows written before a failure stay
/// written and are counted, so a later re-run only fills the gaps.
pub async fn persist_track(
    store: &dyn SubtitleStore,
    video_id: &VideoId,
    track: &SubtitleTrack,
) -> PersistReport {
    let mut report = PersistReport {
        attempted: track.segment_count(),
        ..PersistReport::default()
    };

    let mut session = match store.acquire().await {
        Ok(session) => session,
        Err(e) => {
            warn!("Could not acquire {} connection: {}", store.name(), e);
            report.failure = Some(e);
            return report;
        }
    };

    for segment in track.iter() {
        match session.insert_or_ignore(video_id, segment).await {
            Ok(inserted) => {
                report.written += 1;
                if inserted {
                    report.inserted += 1;
                } else {
                    debug!(
                        "Row ({}, {}, {}) already stored, skipping",
                        video_id, segment.language, segment.start_ms
                    );
                }
            }
            Err(e) => {
                let e = match e {
                    IngestError::StoreUnavailable(_) | IngestError::StoreWriteError(_) => e,
                    other => IngestError::StoreWriteError(other.to_string()),
                };
                warn!(
                    "Write failed for ({}, {}, {}) after {}/{} segments: {}",
                    video_id,
                    segment.language,
                    segment.start_ms,
                    report.written,
                    report.attempted,
                    e
                );
                report.failure = Some(e);
                return report;
            }
        }
    }

    info!(
        "Persisted {} segments for {} ({} new, {} already stored)",
        report.written,
        video_id,
        report.inserted,
        report.ignored()
    );
    report
}
