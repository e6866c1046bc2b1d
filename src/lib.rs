pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod subtitle;
pub mod video_id;
pub mod worker;

pub use config::Config;
pub use error::{ErrorKind, IngestError, Result};
pub use pipeline::{ingest, print_summary, IngestOutcome, IngestStats, Ingestor, Stage};
pub use video_id::{resolve_video_id, VideoId};
