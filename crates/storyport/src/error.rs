use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::{JobId, OwnerId};

/// Errors surfaced to callers of the import pipeline.
///
/// Everything here is raised synchronously by `submit`, `status` or `cancel`.
/// Failures that happen after a job has been handed to the workers are
/// recorded on the job row instead.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Invalid archive: {0}")]
    Validation(String),

    #[error("Owner {owner_id} already has an active import job ({job_id})")]
    Concurrency { owner_id: OwnerId, job_id: JobId },

    #[error("Archive contains no supported documents (expected one of: {supported})")]
    EmptyArchive { supported: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Import pipeline failed: {0}")]
    Pipeline(String),

    #[error("Import job {0} not found")]
    NotFound(JobId),

    #[error("Import workers unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read text: {0}")]
    Text(String),

    #[error("Failed to read DOCX: {0}")]
    Docx(String),

    #[error("Failed to read DOC: {0}")]
    Doc(String),

    #[error("Failed to read PDF: {0}")]
    Pdf(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Unsupported document extension '{0}'")]
    UnsupportedExtension(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ImportError>;
