//! Job progress broadcaster for real-time import status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{Job, JobId, JobStatus, OwnerId};

/// What the worker is doing when an event is sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Queued,
    Started,
    DocumentImported,
    DocumentFailed,
    Checkpoint,
    Finished,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportPhase::Queued => write!(f, "Queued"),
            ImportPhase::Started => write!(f, "Started"),
            ImportPhase::DocumentImported => write!(f, "Document imported"),
            ImportPhase::DocumentFailed => write!(f, "Document failed"),
            ImportPhase::Checkpoint => write!(f, "Checkpoint"),
            ImportPhase::Finished => write!(f, "Finished"),
        }
    }
}

/// Progress event for an import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub phase: ImportPhase,
    /// Job status at the time of the event.
    pub status: JobStatus,
    pub total_documents: u32,
    pub processed_documents: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Sanitized name of the document this event is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Snapshot of `job` tagged with a phase and message.
    pub fn from_job(job: &Job, phase: ImportPhase, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id,
            phase,
            status: job.status,
            total_documents: job.total_documents,
            processed_documents: job.processed_documents,
            successful_imports: job.successful_imports,
            failed_imports: job.failed_imports,
            message: message.into(),
            document: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// True once no further events will follow for this job.
    pub fn is_final(&self) -> bool {
        self.phase == ImportPhase::Finished
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Gets the inner sender for per-job reporters.
    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
