//! Persisted job state machine.
//!
//! Every write is conditional on the status the caller believes the job is
//! in. When a concurrent `cancel` has already moved the row, the write
//! changes nothing and the caller gets [`TrackerError::Superseded`].

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;

use crate::db::job_repo::{self, CounterUpdate, GuardedUpdate, InsertOutcome, JobRow, NewJobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::ImportError;
use crate::job::{Job, JobId, JobMetadata, JobStatus, JobStatusView, OwnerId};

pub const INTERRUPTED_MESSAGE: &str = "Interrupted by process restart";

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is already {current}")]
    Superseded { job_id: JobId, current: JobStatus },

    #[error("Job {job_id} has already accounted for all {total} documents")]
    CounterOverflow { job_id: JobId, total: u32 },

    #[error("Import job {0} not found")]
    NotFound(JobId),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<TrackerError> for ImportError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(id) => ImportError::NotFound(id),
            TrackerError::Storage(e) => ImportError::Database(e),
            other => ImportError::Pipeline(other.to_string()),
        }
    }
}

/// Result of attempting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Success,
    Failure(String),
}

#[derive(Clone)]
pub struct JobTracker {
    db: Database,
}

impl JobTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a pending job, refusing if the owner already has an active one.
    pub fn submit(
        &self,
        owner_id: OwnerId,
        total_documents: u32,
        metadata: &JobMetadata,
    ) -> Result<Job, ImportError> {
        let row = NewJobRow {
            owner_id,
            total_documents: i64::from(total_documents),
            uploaded_filename: metadata.uploaded_filename.clone(),
            file_size: i64::try_from(metadata.file_size).unwrap_or(i64::MAX),
            created_at: format_timestamp(&Utc::now()),
        };

        match job_repo::insert_if_no_active(&self.db, &row) {
            Ok(InsertOutcome::Inserted(row)) => {
                let job = job_from_row(row)?;
                info!(
                    "Created import job {} for owner {} ({} documents)",
                    job.id, owner_id, total_documents
                );
                Ok(job)
            }
            Ok(InsertOutcome::OwnerBusy(job_id)) => {
                Err(ImportError::Concurrency { owner_id, job_id })
            }
            // Another process slipped a job in past our check.
            Err(e) if e.is_constraint_violation() => {
                match job_repo::find_active_by_owner(&self.db, owner_id)? {
                    Some(active) => Err(ImportError::Concurrency {
                        owner_id,
                        job_id: active.id,
                    }),
                    None => Err(ImportError::Database(e)),
                }
            }
            Err(e) => Err(ImportError::Database(e)),
        }
    }

    /// Pending -> Running.
    pub fn mark_running(&self, job: &mut Job) -> Result<(), TrackerError> {
        self.ensure_transition(job, JobStatus::Running)?;

        let now = Utc::now();
        let ts = format_timestamp(&now);
        let update = GuardedUpdate {
            status: Some(JobStatus::Running.as_str()),
            started_at: Some(&ts),
            ..GuardedUpdate::new(&["pending"], &ts)
        };
        self.apply(job, &update)?;

        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.updated_at = now;
        debug!("Job {} running", job.id);
        Ok(())
    }

    /// Counts one attempted document. In memory only; see [`checkpoint`](Self::checkpoint).
    pub fn record_outcome(&self, job: &mut Job, outcome: DocumentOutcome) -> Result<(), TrackerError> {
        if job.status != JobStatus::Running {
            return Err(TrackerError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Running,
            });
        }
        if job.processed_documents >= job.total_documents {
            return Err(TrackerError::CounterOverflow {
                job_id: job.id,
                total: job.total_documents,
            });
        }

        job.processed_documents += 1;
        match outcome {
            DocumentOutcome::Success => job.successful_imports += 1,
            DocumentOutcome::Failure(detail) => {
                job.failed_imports += 1;
                job.errors.push(detail);
            }
        }
        Ok(())
    }

    /// Persists the counters of a running job without changing its status.
    pub fn checkpoint(&self, job: &mut Job) -> Result<(), TrackerError> {
        let now = Utc::now();
        let ts = format_timestamp(&now);
        let errors_json = errors_to_json(&job.errors)?;
        let update = GuardedUpdate {
            counters: Some(counters(job, &errors_json)),
            ..GuardedUpdate::new(&["running"], &ts)
        };
        self.apply(job, &update)?;
        job.updated_at = now;
        debug!(
            "Job {} checkpoint: {}/{} processed",
            job.id, job.processed_documents, job.total_documents
        );
        Ok(())
    }

    /// Running -> Completed, with the final counters and error list.
    pub fn mark_completed(&self, job: &mut Job) -> Result<(), TrackerError> {
        self.finish(job, JobStatus::Completed, None)?;
        info!(
            "Job {} completed: {} imported, {} failed",
            job.id, job.successful_imports, job.failed_imports
        );
        Ok(())
    }

    /// Running -> Failed, for errors that stop the whole batch.
    pub fn mark_failed(&self, job: &mut Job, message: &str) -> Result<(), TrackerError> {
        self.finish(job, JobStatus::Failed, Some(message))?;
        warn!("Job {} failed: {}", job.id, message);
        Ok(())
    }

    /// Pending -> Cancelled for a job that never reached a worker.
    pub fn abandon(&self, job: &mut Job, message: &str) -> Result<(), TrackerError> {
        self.ensure_transition(job, JobStatus::Cancelled)?;

        let now = Utc::now();
        let ts = format_timestamp(&now);
        let update = GuardedUpdate {
            status: Some(JobStatus::Cancelled.as_str()),
            completed_at: Some(&ts),
            error_message: Some(message),
            ..GuardedUpdate::new(&["pending"], &ts)
        };
        self.apply(job, &update)?;

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(now);
        job.updated_at = now;
        job.error_message = Some(message.to_string());
        Ok(())
    }

    /// Moves a pending or running job to Cancelled.
    ///
    /// Returns `false` and leaves the row alone when the job is already
    /// terminal. With `owner_id`, jobs of other owners report `NotFound`.
    pub fn cancel(&self, job_id: JobId, owner_id: Option<OwnerId>) -> Result<bool, TrackerError> {
        let row = job_repo::find_by_id(&self.db, job_id)?.ok_or(TrackerError::NotFound(job_id))?;
        if owner_id.is_some_and(|owner| owner != row.owner_id) {
            return Err(TrackerError::NotFound(job_id));
        }

        let ts = format_timestamp(&Utc::now());
        let update = GuardedUpdate {
            owner_id,
            status: Some(JobStatus::Cancelled.as_str()),
            completed_at: Some(&ts),
            ..GuardedUpdate::new(&["pending", "running"], &ts)
        };
        let changed = job_repo::update_guarded(&self.db, job_id, &update)?;
        if changed {
            info!("Job {} cancelled", job_id);
        }
        Ok(changed)
    }

    /// Called by the worker once it notices its job was cancelled: reloads
    /// the row and stores the counters reached so far.
    pub fn observe_cancellation(&self, job: &mut Job) -> Result<(), TrackerError> {
        let ts = format_timestamp(&Utc::now());
        let errors_json = errors_to_json(&job.errors)?;
        let update = GuardedUpdate {
            counters: Some(counters(job, &errors_json)),
            ..GuardedUpdate::new(&["cancelled"], &ts)
        };
        if !job_repo::update_guarded(&self.db, job.id, &update)? {
            let current = self.current_status(job.id)?;
            return Err(TrackerError::Superseded {
                job_id: job.id,
                current,
            });
        }

        let reloaded = self.get(job.id)?;
        *job = reloaded;
        info!(
            "Job {} stopped after cancellation at {}/{}",
            job.id, job.processed_documents, job.total_documents
        );
        Ok(())
    }

    /// Cancels jobs left pending or running by a previous process.
    pub fn recover_interrupted(&self) -> Result<Vec<JobId>, TrackerError> {
        let mut recovered = Vec::new();
        for row in job_repo::find_all_active(&self.db)? {
            let ts = format_timestamp(&Utc::now());
            let update = GuardedUpdate {
                status: Some(JobStatus::Cancelled.as_str()),
                completed_at: Some(&ts),
                error_message: Some(INTERRUPTED_MESSAGE),
                ..GuardedUpdate::new(&["pending", "running"], &ts)
            };
            if job_repo::update_guarded(&self.db, row.id, &update)? {
                warn!("Job {} was interrupted; marked cancelled", row.id);
                recovered.push(row.id);
            }
        }
        Ok(recovered)
    }

    pub fn get(&self, job_id: JobId) -> Result<Job, TrackerError> {
        let row = job_repo::find_by_id(&self.db, job_id)?.ok_or(TrackerError::NotFound(job_id))?;
        Ok(job_from_row(row)?)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobStatusView, TrackerError> {
        self.get(job_id).map(|job| JobStatusView::from(&job))
    }

    /// Persisted status of the job, as other processes see it.
    pub fn current_status(&self, job_id: JobId) -> Result<JobStatus, TrackerError> {
        let row = job_repo::find_by_id(&self.db, job_id)?.ok_or(TrackerError::NotFound(job_id))?;
        Ok(parse_status(&row.status)?)
    }

    /// Like [`status`](Self::status), but jobs of other owners are `NotFound`.
    pub fn status_for_owner(&self, job_id: JobId, owner_id: OwnerId) -> Result<JobStatusView, TrackerError> {
        let job = self.get(job_id)?;
        if job.owner_id != owner_id {
            return Err(TrackerError::NotFound(job_id));
        }
        Ok(JobStatusView::from(&job))
    }

    /// All of the owner's jobs, newest first. Unknown owners get an empty list.
    pub fn history(&self, owner_id: OwnerId) -> Result<Vec<Job>, TrackerError> {
        job_repo::find_all_by_owner(&self.db, owner_id)?
            .into_iter()
            .map(|row| job_from_row(row).map_err(TrackerError::from))
            .collect()
    }

    fn finish(&self, job: &mut Job, to: JobStatus, message: Option<&str>) -> Result<(), TrackerError> {
        self.ensure_transition(job, to)?;

        let now = Utc::now();
        let ts = format_timestamp(&now);
        let errors_json = errors_to_json(&job.errors)?;
        let update = GuardedUpdate {
            status: Some(to.as_str()),
            completed_at: Some(&ts),
            error_message: message,
            counters: Some(counters(job, &errors_json)),
            ..GuardedUpdate::new(&["running"], &ts)
        };
        self.apply(job, &update)?;

        job.status = to;
        job.completed_at = Some(now);
        job.updated_at = now;
        if let Some(message) = message {
            job.error_message = Some(message.to_string());
        }
        Ok(())
    }

    fn ensure_transition(&self, job: &Job, to: JobStatus) -> Result<(), TrackerError> {
        if job.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TrackerError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to,
            })
        }
    }

    fn apply(&self, job: &Job, update: &GuardedUpdate<'_>) -> Result<(), TrackerError> {
        if job_repo::update_guarded(&self.db, job.id, update)? {
            return Ok(());
        }
        let current = self.current_status(job.id)?;
        Err(TrackerError::Superseded {
            job_id: job.id,
            current,
        })
    }
}

fn counters<'a>(job: &Job, errors_json: &'a str) -> CounterUpdate<'a> {
    CounterUpdate {
        processed_documents: i64::from(job.processed_documents),
        successful_imports: i64::from(job.successful_imports),
        failed_imports: i64::from(job.failed_imports),
        errors_json,
    }
}

fn errors_to_json(errors: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(errors).map_err(|e| DatabaseError::CorruptRow {
        table: "import_jobs",
        reason: format!("cannot encode errors: {}", e),
    })
}

fn parse_status(value: &str) -> Result<JobStatus, DatabaseError> {
    JobStatus::parse(value).ok_or_else(|| DatabaseError::CorruptRow {
        table: "import_jobs",
        reason: format!("unknown status '{}'", value),
    })
}

fn count(value: i64, column: &str) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| DatabaseError::CorruptRow {
        table: "import_jobs",
        reason: format!("{} out of range: {}", column, value),
    })
}

fn job_from_row(row: JobRow) -> Result<Job, DatabaseError> {
    const TABLE: &str = "import_jobs";

    let errors: Vec<String> =
        serde_json::from_str(&row.errors).map_err(|e| DatabaseError::CorruptRow {
            table: TABLE,
            reason: format!("invalid errors JSON: {}", e),
        })?;

    Ok(Job {
        id: row.id,
        owner_id: row.owner_id,
        status: parse_status(&row.status)?,
        total_documents: count(row.total_documents, "total_documents")?,
        processed_documents: count(row.processed_documents, "processed_documents")?,
        successful_imports: count(row.successful_imports, "successful_imports")?,
        failed_imports: count(row.failed_imports, "failed_imports")?,
        error_message: row.error_message,
        errors,
        uploaded_filename: row.uploaded_filename,
        file_size: u64::try_from(row.file_size).unwrap_or(0),
        created_at: parse_timestamp(TABLE, &row.created_at)?,
        updated_at: parse_timestamp(TABLE, &row.updated_at)?,
        started_at: row
            .started_at
            .as_deref()
            .map(|ts| parse_timestamp(TABLE, ts))
            .transpose()?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(|ts| parse_timestamp(TABLE, ts))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JobTracker {
        JobTracker::new(Database::open_in_memory().unwrap())
    }

    fn metadata() -> JobMetadata {
        JobMetadata {
            uploaded_filename: "stories.zip".to_string(),
            file_size: 4096,
        }
    }

    fn running_job(tracker: &JobTracker, owner_id: OwnerId, total: u32) -> Job {
        let mut job = tracker.submit(owner_id, total, &metadata()).unwrap();
        tracker.mark_running(&mut job).unwrap();
        job
    }

    fn assert_consistent(job: &Job) {
        assert_eq!(
            job.successful_imports + job.failed_imports,
            job.processed_documents
        );
        assert!(job.processed_documents <= job.total_documents);
        assert_eq!(job.completed_at.is_some(), job.status.is_terminal());
    }

    #[test]
    fn test_submit_creates_pending_job() {
        let tracker = tracker();
        let job = tracker.submit(7, 3, &metadata()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_documents, 3);
        assert_eq!(job.processed_documents, 0);
        assert_eq!(job.uploaded_filename, "stories.zip");
        assert_eq!(job.file_size, 4096);
        assert!(job.started_at.is_none());
        assert_consistent(&job);
    }

    #[test]
    fn test_submit_rejects_second_active_job() {
        let tracker = tracker();
        let first = tracker.submit(7, 3, &metadata()).unwrap();

        match tracker.submit(7, 1, &metadata()) {
            Err(ImportError::Concurrency { owner_id, job_id }) => {
                assert_eq!(owner_id, 7);
                assert_eq!(job_id, first.id);
            }
            other => panic!("expected Concurrency, got {:?}", other),
        }

        assert!(tracker.submit(8, 1, &metadata()).is_ok());
    }

    #[test]
    fn test_full_lifecycle() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 3);
        assert!(job.started_at.is_some());

        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();
        tracker
            .record_outcome(&mut job, DocumentOutcome::Failure("Document 'b.docx': bad".into()))
            .unwrap();
        tracker.checkpoint(&mut job).unwrap();

        let persisted = tracker.get(job.id).unwrap();
        assert_eq!(persisted.status, JobStatus::Running);
        assert_eq!(persisted.processed_documents, 2);
        assert_eq!(persisted.errors, vec!["Document 'b.docx': bad".to_string()]);
        assert_consistent(&persisted);

        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();
        tracker.mark_completed(&mut job).unwrap();

        let done = tracker.get(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed_documents, 3);
        assert_eq!(done.successful_imports, 2);
        assert_eq!(done.failed_imports, 1);
        assert!(done.error_message.is_none());
        assert_consistent(&done);
    }

    #[test]
    fn test_record_outcome_cannot_exceed_total() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 1);
        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();
        assert!(matches!(
            tracker.record_outcome(&mut job, DocumentOutcome::Success),
            Err(TrackerError::CounterOverflow { total: 1, .. })
        ));
        assert_consistent(&job);
    }

    #[test]
    fn test_record_outcome_requires_running() {
        let tracker = tracker();
        let mut job = tracker.submit(7, 1, &metadata()).unwrap();
        assert!(matches!(
            tracker.record_outcome(&mut job, DocumentOutcome::Success),
            Err(TrackerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_mark_failed_keeps_message() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 2);
        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();
        tracker.mark_failed(&mut job, "database is locked").unwrap();

        let failed = tracker.get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("database is locked"));
        assert_eq!(failed.processed_documents, 1);
        assert_consistent(&failed);
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 0);
        tracker.mark_completed(&mut job).unwrap();

        assert!(matches!(
            tracker.mark_failed(&mut job, "late"),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.mark_running(&mut job),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert!(!tracker.cancel(job.id, None).unwrap());
        assert_eq!(tracker.get(job.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_cancel_pending_and_running() {
        let tracker = tracker();
        let pending = tracker.submit(7, 2, &metadata()).unwrap();
        assert!(tracker.cancel(pending.id, Some(7)).unwrap());
        let cancelled = tracker.get(pending.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_consistent(&cancelled);

        let running = running_job(&tracker, 7, 2);
        assert!(tracker.cancel(running.id, None).unwrap());
        assert!(!tracker.cancel(running.id, None).unwrap());
    }

    #[test]
    fn test_cancel_unknown_or_foreign_job() {
        let tracker = tracker();
        assert!(matches!(tracker.cancel(99, None), Err(TrackerError::NotFound(99))));

        let job = tracker.submit(7, 1, &metadata()).unwrap();
        assert!(matches!(
            tracker.cancel(job.id, Some(8)),
            Err(TrackerError::NotFound(_))
        ));
        assert_eq!(tracker.get(job.id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_cancel_supersedes_worker_writes() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 3);
        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();

        assert!(tracker.cancel(job.id, Some(7)).unwrap());

        match tracker.checkpoint(&mut job) {
            Err(TrackerError::Superseded { current, .. }) => assert_eq!(current, JobStatus::Cancelled),
            other => panic!("expected Superseded, got {:?}", other),
        }
        assert!(matches!(
            tracker.mark_completed(&mut job),
            Err(TrackerError::Superseded { .. })
        ));

        tracker.observe_cancellation(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.processed_documents, 1);
        assert_eq!(tracker.get(job.id).unwrap().successful_imports, 1);
        assert_consistent(&job);
    }

    #[test]
    fn test_abandon_pending_job() {
        let tracker = tracker();
        let mut job = tracker.submit(7, 2, &metadata()).unwrap();
        tracker.abandon(&mut job, "queue full").unwrap();

        let stored = tracker.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.error_message.as_deref(), Some("queue full"));

        // The owner is free again.
        assert!(tracker.submit(7, 1, &metadata()).is_ok());
    }

    #[test]
    fn test_recover_interrupted() {
        let tracker = tracker();
        let pending = tracker.submit(7, 2, &metadata()).unwrap();
        let running = running_job(&tracker, 8, 2);
        let mut done = running_job(&tracker, 9, 0);
        tracker.mark_completed(&mut done).unwrap();

        let mut recovered = tracker.recover_interrupted().unwrap();
        recovered.sort();
        assert_eq!(recovered, vec![pending.id, running.id]);

        let job = tracker.get(running.id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(tracker.get(done.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_status_views() {
        let tracker = tracker();
        let mut job = running_job(&tracker, 7, 4);
        tracker.record_outcome(&mut job, DocumentOutcome::Success).unwrap();
        tracker.checkpoint(&mut job).unwrap();

        let view = tracker.status(job.id).unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert_eq!(view.progress_percent, 25.0);

        assert!(tracker.status_for_owner(job.id, 7).is_ok());
        assert!(matches!(
            tracker.status_for_owner(job.id, 8),
            Err(TrackerError::NotFound(_))
        ));
        assert!(matches!(tracker.status(404), Err(TrackerError::NotFound(404))));
    }

    #[test]
    fn test_history() {
        let tracker = tracker();
        let mut first = running_job(&tracker, 7, 0);
        tracker.mark_completed(&mut first).unwrap();
        let second = tracker.submit(7, 1, &metadata()).unwrap();

        let history = tracker.history(7).unwrap();
        let ids: Vec<_> = history.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert!(tracker.history(404).unwrap().is_empty());
    }

    #[test]
    fn test_tracker_errors_map_to_import_errors() {
        assert!(matches!(
            ImportError::from(TrackerError::NotFound(3)),
            ImportError::NotFound(3)
        ));
        assert!(matches!(
            ImportError::from(TrackerError::Storage(DatabaseError::LockPoisoned)),
            ImportError::Database(DatabaseError::LockPoisoned)
        ));
        assert!(matches!(
            ImportError::from(TrackerError::CounterOverflow { job_id: 1, total: 0 }),
            ImportError::Pipeline(_)
        ));
    }
}
