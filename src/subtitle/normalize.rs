use super::{RawSegment, RawTrackDocument, SubtitleSegment, SubtitleTrack};
use crate::error::{IngestError, Result};
use tracing::debug;

/// Largest millisecond value the store can hold (BIGINT).
const MAX_MILLIS: f64 = i64::MAX as f64;

/// Convert fractional seconds to whole milliseconds, rounding half away from zero.
pub fn seconds_to_millis(seconds: f64) -> Option<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis >= MAX_MILLIS {
        return None;
    }
    Some(millis as u64)
}

/// Turn the worker's raw document into a validated [`SubtitleTrack`].
///
/// Segments whose text is blank are dropped. A missing field, a negative or
/// non-finite time, or a blank or padded language tag fails the whole document.
pub fn normalize_track(doc: RawTrackDocument) -> Result<SubtitleTrack> {
    let mut track = SubtitleTrack::new();

    for (language, raw_segments) in doc {
        if language.trim().is_empty() {
            return Err(IngestError::MalformedOutput(
                "empty language tag".to_string(),
            ));
        }
        if language.trim() != language {
            return Err(IngestError::MalformedOutput(format!(
                "language tag '{language}' has surrounding whitespace"
            )));
        }

        let total = raw_segments.len();
        let mut segments = Vec::with_capacity(total);
        for (index, raw) in raw_segments.into_iter().enumerate() {
            if let Some(segment) = normalize_segment(&language, index, raw)? {
                segments.push(segment);
            }
        }

        if segments.len() < total {
            debug!(
                "Dropped {} blank segments for language '{}'",
                total - segments.len(),
                language
            );
        }
        track.extend_language(&language, segments);
    }

    Ok(track)
}

fn normalize_segment(
    language: &str,
    index: usize,
    raw: RawSegment,
) -> Result<Option<SubtitleSegment>> {
    let missing = |field: &str| {
        IngestError::MalformedOutput(format!(
            "segment {index} of '{language}' is missing '{field}'"
        ))
    };

    let start = raw.start.ok_or_else(|| missing("start"))?;
    let duration = raw.duration.ok_or_else(|| missing("duration"))?;
    let text = raw.text.ok_or_else(|| missing("text"))?;

    let start_ms = to_millis(language, index, "start", start)?;
    let duration_ms = to_millis(language, index, "duration", duration)?;

    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(SubtitleSegment {
        language: language.to_string(),
        start_ms,
        duration_ms,
        text: text.to_string(),
    }))
}

fn to_millis(language: &str, index: usize, field: &str, seconds: f64) -> Result<u64> {
    seconds_to_millis(seconds).ok_or_else(|| {
        IngestError::MalformedOutput(format!(
            "segment {index} of '{language}' has invalid {field} {seconds}"
        ))
    })
}
