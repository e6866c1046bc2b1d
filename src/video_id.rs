use crate::error::{IngestError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Length of a platform video identifier.
pub const VIDEO_ID_LEN: usize = 11;

/// Canonical identifier of one external video.
///
/// Always exactly 11 characters from `[A-Za-z0-9_-]`. The only way to obtain
/// one is through [`resolve_video_id`] or [`VideoId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Accept a bare token, rejecting anything that is not exactly one ID.
    pub fn parse(token: &str) -> Result<Self> {
        if is_token(token) {
            Ok(VideoId(token.to_string()))
        } else {
            Err(IngestError::InvalidSource(format!(
                "'{token}' is not an {VIDEO_ID_LEN}-character video id"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_token(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn url_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // youtube.com/watch?...&v=ID...
            r"^(?:https?://)?(?:www\.|m\.|music\.)?youtube\.com/watch/?\?(?:[^#]*&)?v=([A-Za-z0-9_-]{11})(?:[&#]|$)",
            // youtu.be/ID
            r"^(?:https?://)?(?:www\.)?youtu\.be/([A-Za-z0-9_-]{11})(?:[/?&#]|$)",
            // youtube.com/embed/ID and other path styles
            r"^(?:https?://)?(?:www\.|m\.|music\.)?youtube(?:-nocookie)?\.com/(?:embed|v|e|shorts|live)/([A-Za-z0-9_-]{11})(?:[/?&#]|$)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("Invalid video URL regex"))
        .collect()
    })
}

/// Extract the canonical video id from a user-supplied URL or bare token.
pub fn resolve_video_id(input: &str) -> Result<VideoId> {
    let input = input.trim();
    if input.is_empty() {
        return Err(IngestError::InvalidSource("empty source URL".to_string()));
    }

    if is_token(input) {
        return Ok(VideoId(input.to_string()));
    }

    url_patterns()
        .iter()
        .find_map(|re| re.captures(input))
        .and_then(|caps| caps.get(1))
        .map(|m| VideoId(m.as_str().to_string()))
        .ok_or_else(|| {
            IngestError::InvalidSource(format!("no video id found in '{input}'"))
        })
}
