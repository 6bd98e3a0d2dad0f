//! Broadcasting of import progress for live consumers.

pub mod job_progress;

pub use job_progress::{ImportPhase, JobProgressBroadcaster, JobProgressEvent};
