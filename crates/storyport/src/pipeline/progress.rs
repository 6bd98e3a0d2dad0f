use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{ImportPhase, JobProgressEvent};
use crate::job::Job;

/// Events emitted by the batch runner while it works through a job.
pub enum ProgressEvent {
    Queued,
    Started,
    DocumentImported { document: String },
    DocumentFailed { document: String, error: String },
    Checkpoint,
    Finished,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, job: &Job, event: ProgressEvent);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job: &Job, _event: ProgressEvent) {}
}

/// Bridges runner events onto the broadcast channel.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, job: &Job, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Queued => {
                JobProgressEvent::from_job(job, ImportPhase::Queued, "Import queued")
            }
            ProgressEvent::Started => JobProgressEvent::from_job(
                job,
                ImportPhase::Started,
                format!("Importing {} documents", job.total_documents),
            ),
            ProgressEvent::DocumentImported { document } => {
                JobProgressEvent::from_job(job, ImportPhase::DocumentImported, "Document imported")
                    .with_document(document)
            }
            ProgressEvent::DocumentFailed { document, error } => {
                JobProgressEvent::from_job(job, ImportPhase::DocumentFailed, error)
                    .with_document(document)
            }
            ProgressEvent::Checkpoint => {
                JobProgressEvent::from_job(job, ImportPhase::Checkpoint, "Progress saved")
            }
            ProgressEvent::Finished => {
                let message = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Import {}", job.status));
                JobProgressEvent::from_job(job, ImportPhase::Finished, message)
            }
        };
        let _ = self.sender.send(event);
    }
}
