use super::{SubtitleWorker, WorkerOutput};
use crate::error::{IngestError, Result};
use crate::subtitle::{RawSegment, RawTrackDocument};
use crate::video_id::VideoId;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;
use tracing::{debug, warn};

/// Run the worker once for `video_id` and parse its stdout.
///
/// No retry: a failing worker is reported to the caller as-is.
pub async fn fetch_track_document(
    worker: &dyn SubtitleWorker,
    video_id: &VideoId,
) -> Result<RawTrackDocument> {
    let output = worker.invoke(video_id).await?;
    check_exit(&output)?;

    let stderr = output.stderr_lossy();
    if !stderr.trim().is_empty() {
        debug!("Worker stderr for {}: {}", video_id, stderr.trim());
    }

    parse_document(&output.stdout)
}

fn check_exit(output: &WorkerOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    let stderr = output.stderr_lossy();
    warn!(
        "Worker failed with exit code {:?}: {}",
        output.exit_code,
        stderr.trim()
    );
    Err(IngestError::WorkerFailure {
        exit_code: output.exit_code,
        stderr,
    })
}

/// Parse worker stdout as a language -> segment list mapping.
pub fn parse_document(stdout: &[u8]) -> Result<RawTrackDocument> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::MalformedOutput(
            "worker produced no output".to_string(),
        ));
    }
    serde_json::from_slice::<DistinctLanguages>(stdout)
        .map(|doc| doc.0)
        .map_err(|e| IngestError::MalformedOutput(format!("invalid subtitle document: {e}")))
}

/// A track document in which every language key appears once.
struct DistinctLanguages(RawTrackDocument);

impl<'de> Deserialize<'de> for DistinctLanguages {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(DistinctLanguagesVisitor)
    }
}

struct DistinctLanguagesVisitor;

impl<'de> Visitor<'de> for DistinctLanguagesVisitor {
    type Value = DistinctLanguages;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from language to segment list")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut doc = RawTrackDocument::new();
        while let Some(language) = map.next_key::<String>()? {
            if doc.contains_key(&language) {
                return Err(de::Error::custom(format!(
                    "duplicate language '{language}'"
                )));
            }
            let segments = map.next_value::<Vec<RawSegment>>()?;
            doc.insert(language, segments);
        }
        Ok(DistinctLanguages(doc))
    }
}
