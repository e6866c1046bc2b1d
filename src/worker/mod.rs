pub mod process;
pub mod supervisor;

pub use process::ProcessWorker;
pub use supervisor::{fetch_track_document, parse_document};

use crate::error::Result;
use crate::video_id::VideoId;
use async_trait::async_trait;

/// Everything a finished worker left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl WorkerOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Something that can extract subtitle data for a video.
///
/// [`ProcessWorker`] runs an external program; tests substitute canned output.
#[async_trait]
pub trait SubtitleWorker: Send + Sync {
    /// Run one extraction. Errors are reserved for failing to run at all
    /// (spawn failure, timeout); a non-zero exit is reported in the output.
    async fn invoke(&self, video_id: &VideoId) -> Result<WorkerOutput>;
    fn name(&self) -> &str;
}
