use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: &str = "1.0";

/// 50 MiB, the upload ceiling for a single archive.
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 50 * 1024 * 1024;

pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

/// Settings for the bulk import pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub version: String,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    #[serde(default = "default_max_archive_bytes")]
    pub max_entry_bytes: u64,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Bounded hand-off queue between `submit` and the workers.
    /// Defaults to twice the worker count.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_true")]
    pub require_zip_extension: bool,
}

fn default_max_archive_bytes() -> u64 {
    DEFAULT_MAX_ARCHIVE_BYTES
}

fn default_supported_extensions() -> Vec<String> {
    ["txt", "doc", "docx", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_checkpoint_interval() -> usize {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            max_archive_bytes: default_max_archive_bytes(),
            max_entry_bytes: default_max_archive_bytes(),
            supported_extensions: default_supported_extensions(),
            checkpoint_interval: default_checkpoint_interval(),
            worker_count: default_worker_count(),
            queue_capacity: None,
            database_path: None,
            require_zip_extension: true,
        }
    }
}

impl ImportConfig {
    /// Lowercased extensions without a leading dot.
    pub fn normalized_extensions(&self) -> BTreeSet<String> {
        self.supported_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.worker_count.max(1) * 2)
    }

    /// Configured database path, falling back to the per-user data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Document formats the importer knows how to turn into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Doc,
    Docx,
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match normalize_extension(ext).as_str() {
            "txt" | "text" | "md" => Some(Self::Text),
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "plain text"),
            Self::Doc => write!(f, "Word 97-2003"),
            Self::Docx => write!(f, "Word (OOXML)"),
            Self::Pdf => write!(f, "PDF"),
        }
    }
}
