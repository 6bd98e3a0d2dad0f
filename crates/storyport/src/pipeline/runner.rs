use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn};

use crate::archive::ExtractedDocument;
use crate::content::{ContentStore, NewContentRecord, TitleResolver};
use crate::decoder::DecoderRegistry;
use crate::job::tracker::DocumentOutcome;
use crate::job::{CancelToken, CancellationRegistry, Job, JobStatus, JobTracker, TrackerError};
use crate::sanitize::redact_entry_name;
use crate::worker::ImportTask;

use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

/// Works through the documents of one job, one at a time, in archive order.
pub struct BatchRunner {
    tracker: JobTracker,
    store: Arc<dyn ContentStore>,
    decoders: DecoderRegistry,
    titles: TitleResolver,
    cancellations: CancellationRegistry,
    checkpoint_interval: usize,
}

impl BatchRunner {
    pub fn new(
        tracker: JobTracker,
        store: Arc<dyn ContentStore>,
        cancellations: CancellationRegistry,
        checkpoint_interval: usize,
    ) -> Self {
        Self {
            tracker,
            store,
            decoders: DecoderRegistry::new(),
            titles: TitleResolver::new(),
            cancellations,
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    /// Runs the job to a terminal state and returns its final value.
    pub fn run(&self, task: ImportTask, progress: &dyn ProgressReporter) -> Job {
        let ImportTask {
            mut job,
            documents,
            cancel,
        } = task;
        let _span = info_span!(
            "import_job",
            job_id = job.id,
            owner_id = job.owner_id,
            documents = documents.len(),
        )
        .entered();

        match self.tracker.mark_running(&mut job) {
            Ok(()) => {
                info!("Import started");
                progress.report(&job, ProgressEvent::Started);
                self.run_documents(&mut job, &documents, &cancel, progress);
            }
            Err(e) => self.halt(&mut job, e),
        }

        self.cancellations.release(job.id);
        progress.report(&job, ProgressEvent::Finished);
        job
    }

    fn run_documents(
        &self,
        job: &mut Job,
        documents: &[ExtractedDocument],
        cancel: &CancelToken,
        progress: &dyn ProgressReporter,
    ) {
        for document in documents {
            if cancel.is_cancelled() {
                self.stop_cancelled(job);
                return;
            }
            // A cancel from another process or through the tracker only reaches the row.
            match self.tracker.current_status(job.id) {
                Ok(JobStatus::Running) => {}
                Ok(JobStatus::Cancelled) => {
                    self.stop_cancelled(job);
                    return;
                }
                Ok(current) => {
                    self.halt(job, TrackerError::Superseded { job_id: job.id, current });
                    return;
                }
                Err(e) => {
                    self.halt(job, e);
                    return;
                }
            }

            let name = redact_entry_name(&document.filename);
            let _doc_span = info_span!("document", name = %name, format = %document.format).entered();

            let outcome = match self.import_document(job, document) {
                Ok(record_id) => {
                    debug!(record_id, "Document imported");
                    progress.report(job, ProgressEvent::DocumentImported { document: name });
                    DocumentOutcome::Success
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Storage unavailable, stopping import");
                    if let Err(e) = self.tracker.mark_failed(job, &format!("Storage unavailable: {}", e)) {
                        self.halt(job, e);
                    }
                    return;
                }
                Err(e) => {
                    let detail = format!("Document '{}': {}", document.filename, e);
                    warn!(error = %e, "Document failed");
                    progress.report(
                        job,
                        ProgressEvent::DocumentFailed {
                            document: name,
                            error: detail.clone(),
                        },
                    );
                    DocumentOutcome::Failure(detail)
                }
            };

            if let Err(e) = self.tracker.record_outcome(job, outcome) {
                self.halt(job, e);
                return;
            }

            let processed = job.processed_documents as usize;
            if processed % self.checkpoint_interval == 0 && job.processed_documents < job.total_documents {
                if let Err(e) = self.tracker.checkpoint(job) {
                    self.halt(job, e);
                    return;
                }
                progress.report(job, ProgressEvent::Checkpoint);
            }
        }

        match self.tracker.mark_completed(job) {
            Ok(()) => info!(
                successful = job.successful_imports,
                failed = job.failed_imports,
                "Import completed"
            ),
            Err(e) => self.halt(job, e),
        }
    }

    fn import_document(&self, job: &Job, document: &ExtractedDocument) -> Result<i64, PipelineError> {
        let text = catch_unwind(AssertUnwindSafe(|| self.decoders.decode(document)))
            .map_err(|panic| PipelineError::DecoderPanic(panic_message(panic.as_ref())))??;

        if text.trim().is_empty() {
            return Err(PipelineError::EmptyDocument);
        }

        let now = Utc::now();
        let title = self
            .titles
            .resolve(self.store.as_ref(), job.owner_id, &document.filename, now)?;
        let record = NewContentRecord::draft(job.owner_id, title, text, Some(job.id), now);

        Ok(self.store.create(&record)?)
    }

    /// The job row was cancelled: store our counters on it and stop.
    fn stop_cancelled(&self, job: &mut Job) {
        match self.tracker.observe_cancellation(job) {
            Ok(()) => info!(
                processed = job.processed_documents,
                total = job.total_documents,
                "Import cancelled"
            ),
            Err(e) => {
                error!(error = %e, "Could not record counters of cancelled job");
                job.status = JobStatus::Cancelled;
            }
        }
    }

    /// Ends the run after the tracker refused a write.
    fn halt(&self, job: &mut Job, err: TrackerError) {
        match err {
            TrackerError::Superseded {
                current: JobStatus::Cancelled,
                ..
            } => self.stop_cancelled(job),
            TrackerError::Superseded { current, .. } => {
                warn!(%current, "Job was finished elsewhere");
                match self.tracker.get(job.id) {
                    Ok(latest) => *job = latest,
                    Err(e) => error!(error = %e, "Could not reload job"),
                }
            }
            other => {
                error!(error = %other, "Import stopped");
                if job.status == JobStatus::Running {
                    if let Err(e) = self.tracker.mark_failed(job, &other.to_string()) {
                        error!(error = %e, "Could not mark job failed");
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
