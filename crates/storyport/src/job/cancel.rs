use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::JobId;

/// Cooperative cancellation flag shared between `cancel` and the job's worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Live cancel tokens, one per job that has been handed to a worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancelToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: JobId) -> CancelToken {
        let token = CancelToken::new();
        self.lock().insert(job_id, token.clone());
        token
    }

    /// Trips the job's token. Returns false if no worker holds one.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn release(&self, job_id: JobId) {
        self.lock().remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The map stays consistent across a panic, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, CancelToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
