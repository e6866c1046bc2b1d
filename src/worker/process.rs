use super::{SubtitleWorker, WorkerOutput};
use crate::error::{IngestError, Result};
use crate::video_id::VideoId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable carrying the preferred subtitle languages to the worker.
pub const LANGUAGES_ENV: &str = "SUBTITLE_LANGUAGES";

/// Runs an external extraction program once per request.
///
/// The command line is `<program> [args...] <video_id>`. The child is killed
/// if the invoking future is dropped or the timeout expires.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    languages: Vec<String>,
}

impl ProcessWorker {
    /// Create a worker that runs `program` with no extra arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            languages: Vec::new(),
        }
    }

    /// Fixed arguments placed before the video id.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn command(&self, video_id: &VideoId) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(video_id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.languages.is_empty() {
            cmd.env(LANGUAGES_ENV, self.languages.join(","));
        }
        cmd
    }
}

#[async_trait]
impl SubtitleWorker for ProcessWorker {
    async fn invoke(&self, video_id: &VideoId) -> Result<WorkerOutput> {
        let start = Instant::now();
        debug!(
            "Spawning worker {} {:?} {}",
            self.program.display(),
            self.args,
            video_id
        );

        let child = self.command(video_id).spawn().map_err(|e| {
            IngestError::SpawnFailure(format!("{}: {e}", self.program.display()))
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Worker for {} exceeded {:.1}s, terminating",
                        video_id,
                        limit.as_secs_f64()
                    );
                    return Err(IngestError::WorkerTimeout(limit));
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(wait_error)?;

        debug!(
            "Worker for {} exited with {:?} in {}ms ({} bytes stdout, {} bytes stderr)",
            video_id,
            output.status.code(),
            start.elapsed().as_millis(),
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(WorkerOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }

    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("worker")
    }
}

/// A failed wait means the worker's outcome is unknown, so it counts as a
/// worker failure without an exit code.
fn wait_error(e: std::io::Error) -> IngestError {
    IngestError::WorkerFailure {
        exit_code: None,
        stderr: format!("failed to collect worker output: {e}"),
    }
}
