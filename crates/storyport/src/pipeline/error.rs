use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::DecodeError;

pub const EMPTY_DOCUMENT_MESSAGE: &str = "Document is empty or could not extract content";

/// Why a single document could not be imported.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{}", EMPTY_DOCUMENT_MESSAGE)]
    EmptyDocument,

    #[error("Decoder crashed: {0}")]
    DecoderPanic(String),

    #[error("Failed to save story: {0}")]
    Storage(#[from] DatabaseError),
}

impl PipelineError {
    /// Errors that stop the whole batch rather than one document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Storage(e) if e.is_unavailable())
    }
}
