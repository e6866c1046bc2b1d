pub mod normalize;

pub use normalize::{normalize_track, seconds_to_millis};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One caption entry exactly as the worker reported it.
///
/// Every field is optional here so that a missing field surfaces as a
/// normalization error instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSegment {
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub text: Option<String>,
}

/// Worker stdout document: language tag to ordered segment list.
pub type RawTrackDocument = BTreeMap<String, Vec<RawSegment>>;

/// One timed caption unit in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleSegment {
    pub language: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub text: String,
}

/// Normalized subtitles for one video, keyed by language tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SubtitleTrack {
    languages: BTreeMap<String, Vec<SubtitleSegment>>,
}

impl SubtitleTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append segments for a language, keeping worker order.
    pub fn extend_language(&mut self, language: &str, segments: Vec<SubtitleSegment>) {
        if segments.is_empty() {
            return;
        }
        self.languages
            .entry(language.to_string())
            .or_default()
            .extend(segments);
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn language_count(&self) -> usize {
        self.languages.len()
    }

    /// Total number of segments across all languages.
    pub fn segment_count(&self) -> usize {
        self.languages.values().map(Vec::len).sum()
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn segments(&self, language: &str) -> Option<&[SubtitleSegment]> {
        self.languages.get(language).map(Vec::as_slice)
    }

    /// All segments in persistence order: languages sorted, segments as reported.
    pub fn iter(&self) -> impl Iterator<Item = &SubtitleSegment> {
        self.languages.values().flatten()
    }
}
