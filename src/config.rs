use crate::error::{IngestError, Result};
use crate::store::StoreBackend;
use crate::worker::ProcessWorker;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `sqlite://<path>`, `sqlite::memory:` or `postgres://...`.
    pub database_url: String,
    /// Extraction program; the video id is appended to its arguments.
    pub worker_program: String,
    pub worker_args: Vec<String>,
    /// Seconds before a worker is killed. 0 disables the limit.
    pub worker_timeout_secs: u64,
    /// Preferred subtitle languages, forwarded to the worker.
    pub languages: Vec<String>,
    /// Maximum pooled store connections.
    pub pool_size: usize,
    /// Maximum requests in flight for batch ingestion.
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://subtitles.db".to_string(),
            worker_program: "python3".to_string(),
            worker_args: vec!["get_subtitles.py".to_string()],
            worker_timeout_secs: 120,
            languages: vec!["en".to_string(), "ja".to_string()],
            pool_size: 8,
            concurrency: 4,
        }
    }
}

impl Config {
    /// Defaults, then the user config file, then environment variables.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))
    }

    /// Override fields from environment variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(program) = var("SUBINGEST_WORKER") {
            self.worker_program = program;
        }
        if let Some(args) = var("SUBINGEST_WORKER_ARGS") {
            self.worker_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(timeout) = var("SUBINGEST_WORKER_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                self.worker_timeout_secs = t;
            }
        }
        if let Some(languages) = var("SUBINGEST_LANGUAGES") {
            self.languages = languages
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(size) = var("SUBINGEST_POOL_SIZE") {
            if let Ok(s) = size.parse() {
                self.pool_size = s;
            }
        }
        if let Some(concurrency) = var("SUBINGEST_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_program.trim().is_empty() {
            return Err(IngestError::Config(
                "worker_program must not be empty. Set SUBINGEST_WORKER".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(IngestError::Config(
                "Pool size must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(IngestError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        StoreBackend::from_url(&self.database_url)?;
        Ok(())
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout_secs > 0).then(|| Duration::from_secs(self.worker_timeout_secs))
    }

    /// Build the process-backed worker described by this config.
    pub fn process_worker(&self) -> ProcessWorker {
        ProcessWorker::new(&self.worker_program)
            .with_args(self.worker_args.clone())
            .with_timeout(self.worker_timeout())
            .with_languages(self.languages.clone())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("subingest").join("config.toml"))
    }
}
