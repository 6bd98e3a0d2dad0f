//! Test harness for isolated pipeline runs.
//!
//! Each `TestHarness` owns a temporary directory holding its own SQLite
//! database and a running `ImportPipeline` with a single worker.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use storyport::content::SqliteContentStore;
use storyport::{
    ContentRecord, ContentStore, Database, ImportConfig, ImportPipeline, Job, JobId,
    JobProgressBroadcaster, OwnerId,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(20);

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pipeline: Option<ImportPipeline>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness with a tweaked config. Starts from one worker and a
    /// checkpoint every 10 documents.
    pub fn with_config(adjust: impl FnOnce(&mut ImportConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("imports.db");
        let db = Database::open(&db_path).expect("Failed to open database");
        let config = test_config(adjust);
        let pipeline = ImportPipeline::new(config, db.clone()).expect("Failed to build pipeline");

        Self {
            temp_dir,
            db_path,
            db,
            pipeline: Some(pipeline),
        }
    }

    /// Harness whose workers write through `store`.
    pub fn with_store(store: Arc<dyn ContentStore>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("imports.db");
        let db = Database::open(&db_path).expect("Failed to open database");
        let pipeline = ImportPipeline::with_parts(
            test_config(|_| {}),
            db.clone(),
            store,
            JobProgressBroadcaster::default(),
        )
        .expect("Failed to build pipeline");

        Self {
            temp_dir,
            db_path,
            db,
            pipeline: Some(pipeline),
        }
    }

    pub fn pipeline(&self) -> &ImportPipeline {
        self.pipeline.as_ref().expect("pipeline already shut down")
    }

    /// Store over the harness database, for seeding and inspecting records.
    pub fn store(&self) -> SqliteContentStore {
        SqliteContentStore::new(self.db.clone())
    }

    pub fn records(&self, owner_id: OwnerId) -> Vec<ContentRecord> {
        self.store().list_for_owner(owner_id).expect("Failed to list records")
    }

    /// Polls until the job reaches a terminal state.
    pub fn wait_for_job(&self, job_id: JobId) -> Job {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = self.pipeline().tracker().get(job_id).expect("job should exist");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                job.status,
                WAIT_TIMEOUT
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Submits an archive named `stories.zip` and waits for the job to finish.
    pub fn import(&self, owner_id: OwnerId, archive: &[u8]) -> Job {
        let job = self
            .pipeline()
            .submit(archive, owner_id, "stories.zip")
            .expect("submit should succeed");
        self.wait_for_job(job.id)
    }

    /// Drains the workers.
    pub fn shutdown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn test_config(adjust: impl FnOnce(&mut ImportConfig)) -> ImportConfig {
    let mut config = ImportConfig {
        worker_count: 1,
        ..ImportConfig::default()
    };
    adjust(&mut config);
    config
}

/// Asserts the counter invariants every observed job must satisfy.
pub fn assert_job_consistent(job: &Job) {
    assert_eq!(
        job.successful_imports + job.failed_imports,
        job.processed_documents,
        "successful + failed must equal processed: {:?}",
        job
    );
    assert!(
        job.processed_documents <= job.total_documents,
        "processed exceeds total: {:?}",
        job
    );
    assert_eq!(
        job.errors.len() as u32,
        job.failed_imports,
        "one error per failed document: {:?}",
        job
    );
}
