//! Database error types.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be mapped back into a domain type.
    #[error("Corrupt row in '{table}': {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// The store refused service for reasons unrelated to the data.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// True when a UNIQUE, CHECK or foreign key constraint rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlite(e) => e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation),
            _ => false,
        }
    }

    /// True when the failure is about the store itself rather than the row
    /// being written, so retrying the next document would fail the same way.
    pub fn is_unavailable(&self) -> bool {
        match self {
            DatabaseError::Sqlite(e) => match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation)
                | Some(ErrorCode::TooBig)
                | Some(ErrorCode::TypeMismatch) => false,
                Some(_) => true,
                None => false,
            },
            DatabaseError::Io { .. }
            | DatabaseError::Migration { .. }
            | DatabaseError::Unavailable(_)
            | DatabaseError::LockPoisoned => true,
            DatabaseError::CorruptRow { .. } => false,
        }
    }
}
