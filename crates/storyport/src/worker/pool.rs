use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::broadcast::job_progress::JobProgressEvent;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressReporter};
use crate::pipeline::BatchRunner;
use crate::worker::ImportTask;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("import queue is full ({0} jobs waiting)")]
    QueueFull(usize),
}

/// Fixed set of worker threads fed by a bounded queue.
pub struct WorkerPool {
    task_sender: Sender<ImportTask>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    capacity: usize,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` or `queue_capacity` is 0.
    pub fn new(
        runner: Arc<BatchRunner>,
        worker_count: usize,
        queue_capacity: usize,
        progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        assert!(queue_capacity > 0, "queue_capacity must be > 0");
        let (task_sender, task_receiver) = bounded::<ImportTask>(queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);
            let sender = progress_sender.clone();

            let handle = thread::Builder::new()
                .name(format!("storyport-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, task_rx, shutdown_flag, worker_runner, sender));

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} import workers", workers.len());

        Self {
            task_sender,
            workers,
            shutdown,
            capacity: queue_capacity,
        }
    }

    /// Queues a task without blocking the caller.
    pub fn submit(&self, task: ImportTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) || self.workers.is_empty() {
            return Err(WorkerError::ShutDown);
        }

        self.task_sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => WorkerError::QueueFull(self.capacity),
            TrySendError::Disconnected(_) => WorkerError::ShutDown,
        })
    }

    /// Stops workers after their current job. Queued jobs stay pending.
    pub fn shutdown(&self) {
        info!("Shutting down import workers...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for the workers to exit. Without a prior `shutdown`, queued
    /// jobs are drained first.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All import workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<ImportTask>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<BatchRunner>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    let progress: Box<dyn ProgressReporter> = match progress_sender {
        Some(sender) => Box::new(BroadcastProgress::new(sender)),
        None => Box::new(NoopProgress),
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => {
                debug!("Worker {} picked up job {}", worker_id, task.job.id);
                let job = runner.run(task, progress.as_ref());
                debug!("Worker {} finished job {} ({})", worker_id, job.id, job.status);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
