pub mod archive;
pub mod broadcast;
pub mod config;
pub mod content;
pub mod db;
pub mod decoder;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod sanitize;
pub mod telemetry;
pub mod worker;

pub use archive::{ArchiveExtractor, ExtractedDocument};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, DocumentFormat, ImportConfig};
pub use content::{ContentRecord, ContentStore, NewContentRecord, TitleResolver};
pub use db::{Database, DatabaseError};
pub use decoder::{ContentDecoder, DecoderRegistry};
pub use error::{ConfigError, DecodeError, ImportError, Result};
pub use job::{Job, JobId, JobStatus, JobStatusView, JobTracker, OwnerId, TrackerError};
pub use pipeline::{ImportPipeline, JobCanceller};
