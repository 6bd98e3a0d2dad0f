//! Front door of the import pipeline.
//!
//! `submit` runs on the caller's thread only as far as validating the
//! upload, extracting its documents and creating the job. Everything after
//! that happens on the worker pool and is visible through the job record.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn};

use crate::archive::ArchiveExtractor;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::loader::validate_config;
use crate::config::ImportConfig;
use crate::content::{ContentStore, SqliteContentStore};
use crate::db::Database;
use crate::error::{ConfigError, ImportError, Result};
use crate::job::{CancellationRegistry, Job, JobId, JobMetadata, JobStatusView, JobTracker, OwnerId};
use crate::sanitize::redact_entry_name;
use crate::worker::{ImportTask, WorkerPool};

use super::progress::{BroadcastProgress, ProgressEvent, ProgressReporter};
use super::runner::BatchRunner;

pub struct ImportPipeline {
    config: Arc<ImportConfig>,
    extractor: ArchiveExtractor,
    tracker: JobTracker,
    cancellations: CancellationRegistry,
    broadcaster: JobProgressBroadcaster,
    progress: BroadcastProgress,
    pool: WorkerPool,
}

impl ImportPipeline {
    /// Opens the configured database and starts the workers.
    pub fn open(config: ImportConfig) -> Result<Self> {
        let path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "No database_path configured and no user data directory found".to_string(),
        })?;
        let db = Database::open(&path)?;
        Self::new(config, db)
    }

    pub fn new(config: ImportConfig, db: Database) -> Result<Self> {
        let store = Arc::new(SqliteContentStore::new(db.clone()));
        Self::with_parts(config, db, store, JobProgressBroadcaster::default())
    }

    /// Builds a pipeline around a caller-supplied content store.
    pub fn with_parts(
        config: ImportConfig,
        db: Database,
        store: Arc<dyn ContentStore>,
        broadcaster: JobProgressBroadcaster,
    ) -> Result<Self> {
        validate_config(&config)?;

        let tracker = JobTracker::new(db);
        let cancellations = CancellationRegistry::new();
        let runner = Arc::new(BatchRunner::new(
            tracker.clone(),
            store,
            cancellations.clone(),
            config.checkpoint_interval,
        ));
        let pool = WorkerPool::new(
            runner,
            config.worker_count,
            config.queue_capacity(),
            Some(broadcaster.sender()),
        );

        Ok(Self {
            extractor: ArchiveExtractor::new(&config),
            config: Arc::new(config),
            tracker,
            cancellations,
            progress: BroadcastProgress::new(broadcaster.sender()),
            broadcaster,
            pool,
        })
    }

    /// Validates and extracts the archive, creates a pending job and queues it.
    ///
    /// Nothing is written when the archive is rejected. If the queue refuses
    /// the job, it is cancelled again and `Unavailable` is returned.
    pub fn submit(&self, archive: &[u8], owner_id: OwnerId, uploaded_filename: &str) -> Result<Job> {
        let _span = info_span!(
            "import_submit",
            owner_id,
            upload = %redact_entry_name(uploaded_filename),
            bytes = archive.len(),
        )
        .entered();

        self.extractor.validate_upload(archive, uploaded_filename)?;
        let documents = self.extractor.extract(archive)?;
        let total = u32::try_from(documents.len())
            .map_err(|_| ImportError::Validation("Archive has too many documents".to_string()))?;

        let metadata = JobMetadata {
            uploaded_filename: uploaded_filename.to_string(),
            file_size: archive.len() as u64,
        };
        let mut job = self.tracker.submit(owner_id, total, &metadata)?;
        let cancel = self.cancellations.register(job.id);
        self.progress.report(&job, ProgressEvent::Queued);

        if let Err(e) = self.pool.submit(ImportTask::new(job.clone(), documents, cancel)) {
            self.cancellations.release(job.id);
            let message = format!("Import could not be scheduled: {}", e);
            warn!(job_id = job.id, error = %e, "Import not scheduled");
            if let Err(err) = self.tracker.abandon(&mut job, &message) {
                error!(job_id = job.id, error = %err, "Could not cancel unscheduled job");
            }
            self.progress.report(&job, ProgressEvent::Finished);
            return Err(ImportError::Unavailable(e.to_string()));
        }

        info!(job_id = job.id, documents = total, "Import queued");
        Ok(job)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobStatusView> {
        Ok(self.tracker.status(job_id)?)
    }

    /// Status of a job the owner submitted. Other owners' jobs are `NotFound`.
    pub fn status_for_owner(&self, job_id: JobId, owner_id: OwnerId) -> Result<JobStatusView> {
        Ok(self.tracker.status_for_owner(job_id, owner_id)?)
    }

    /// Cancels a pending or running job. `false` when it already finished.
    pub fn cancel(&self, job_id: JobId, owner_id: OwnerId) -> Result<bool> {
        self.canceller().cancel(job_id, owner_id)
    }

    /// A handle that can cancel jobs from other threads, such as a signal handler.
    pub fn canceller(&self) -> JobCanceller {
        JobCanceller {
            tracker: self.tracker.clone(),
            cancellations: self.cancellations.clone(),
        }
    }

    pub fn history(&self, owner_id: OwnerId) -> Result<Vec<Job>> {
        Ok(self.tracker.history(owner_id)?)
    }

    /// Cancels jobs a previous process left pending or running.
    ///
    /// Only call this while no other process is importing into the same database.
    pub fn recover_interrupted(&self) -> Result<Vec<JobId>> {
        Ok(self.tracker.recover_interrupted()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Finishes queued and running jobs, then stops the workers.
    pub fn shutdown(self) {
        self.pool.wait();
    }
}

#[derive(Clone)]
pub struct JobCanceller {
    tracker: JobTracker,
    cancellations: CancellationRegistry,
}

impl JobCanceller {
    /// Marks the row cancelled, then trips the worker's token.
    pub fn cancel(&self, job_id: JobId, owner_id: OwnerId) -> Result<bool> {
        let cancelled = self.tracker.cancel(job_id, Some(owner_id))?;
        if cancelled {
            self.cancellations.cancel(job_id);
        }
        Ok(cancelled)
    }
}
