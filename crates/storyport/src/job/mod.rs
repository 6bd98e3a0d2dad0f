//! Import job model and its state machine.

pub mod cancel;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cancel::{CancelToken, CancellationRegistry};
pub use tracker::{JobTracker, TrackerError};

pub type JobId = i64;
pub type OwnerId = i64;

/// Lifecycle of an import job.
///
/// `Pending -> Running -> {Completed, Failed}`, and `{Pending, Running} -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload details recorded on the job at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetadata {
    pub uploaded_filename: String,
    pub file_size: u64,
}

/// A bulk import job as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub total_documents: u32,
    pub processed_documents: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    pub error_message: Option<String>,
    pub errors: Vec<String>,
    pub uploaded_filename: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Share of documents attempted so far, 0 when the job has no documents.
    pub fn progress_percent(&self) -> f64 {
        if self.total_documents == 0 {
            return 0.0;
        }
        f64::from(self.processed_documents) / f64::from(self.total_documents) * 100.0
    }
}

/// What status queries hand back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub total_documents: u32,
    pub processed_documents: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    pub error_message: Option<String>,
    pub errors: Vec<String>,
    pub uploaded_filename: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress_percent: job.progress_percent(),
            total_documents: job.total_documents,
            processed_documents: job.processed_documents,
            successful_imports: job.successful_imports,
            failed_imports: job.failed_imports,
            error_message: job.error_message.clone(),
            errors: job.errors.clone(),
            uploaded_filename: job.uploaded_filename.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
