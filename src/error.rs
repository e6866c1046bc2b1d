use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Failed to start worker: {0}")]
    SpawnFailure(String),

    #[error("Worker exited with {}: {}", describe_exit(.exit_code), .stderr.trim())]
    WorkerFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed worker output: {0}")]
    MalformedOutput(String),

    #[error("Worker timed out after {:.1}s", .0.as_secs_f64())]
    WorkerTimeout(Duration),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store write failed: {0}")]
    StoreWriteError(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-facing classification of an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSource,
    SpawnFailure,
    WorkerFailure,
    MalformedOutput,
    WorkerTimeout,
    StoreUnavailable,
    StoreWriteError,
    Config,
    Io,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidSource(_) => ErrorKind::InvalidSource,
            IngestError::SpawnFailure(_) => ErrorKind::SpawnFailure,
            IngestError::WorkerFailure { .. } => ErrorKind::WorkerFailure,
            IngestError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            IngestError::WorkerTimeout(_) => ErrorKind::WorkerTimeout,
            IngestError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            IngestError::StoreWriteError(_) => ErrorKind::StoreWriteError,
            IngestError::Config(_) => ErrorKind::Config,
            IngestError::Io(_) => ErrorKind::Io,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidSource => "invalid_source",
            ErrorKind::SpawnFailure => "spawn_failure",
            ErrorKind::WorkerFailure => "worker_failure",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::WorkerTimeout => "worker_timeout",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::StoreWriteError => "store_write_error",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
