use crate::archive::ExtractedDocument;
use crate::job::{CancelToken, Job};

/// Everything a worker needs to run one import job.
#[derive(Debug)]
pub struct ImportTask {
    pub job: Job,
    /// In archive order.
    pub documents: Vec<ExtractedDocument>,
    pub cancel: CancelToken,
}

impl ImportTask {
    pub fn new(job: Job, documents: Vec<ExtractedDocument>, cancel: CancelToken) -> Self {
        Self {
            job,
            documents,
            cancel,
        }
    }
}
