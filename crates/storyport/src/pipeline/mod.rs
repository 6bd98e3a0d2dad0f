pub mod error;
pub mod import;
pub mod progress;
pub mod runner;

pub use error::{PipelineError, EMPTY_DOCUMENT_MESSAGE};
pub use import::{ImportPipeline, JobCanceller};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::BatchRunner;
