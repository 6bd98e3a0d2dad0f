//! Archive validation and extraction.
//!
//! Runs on the submitting thread, so everything here is bounded: the upload
//! size is checked before the central directory is read, and every member is
//! read through a `take` limited to `max_entry_bytes + 1`.

use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::config::schema::{normalize_extension, DocumentFormat, ImportConfig};
use crate::error::ImportError;
use crate::sanitize::redact_entry_name;

/// One supported member of an uploaded archive.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Entry name as stored in the archive, directories included.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Lowercased, without the dot.
    pub extension: String,
    pub format: DocumentFormat,
}

pub struct ArchiveExtractor {
    max_archive_bytes: u64,
    max_entry_bytes: u64,
    supported_extensions: BTreeSet<String>,
    require_zip_extension: bool,
}

impl ArchiveExtractor {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            max_archive_bytes: config.max_archive_bytes,
            max_entry_bytes: config.max_entry_bytes,
            supported_extensions: config.normalized_extensions(),
            require_zip_extension: config.require_zip_extension,
        }
    }

    /// Comma separated list of accepted extensions, for error messages.
    pub fn supported_list(&self) -> String {
        self.supported_extensions
            .iter()
            .map(|ext| format!(".{}", ext))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checks the upload itself before any entry is touched.
    pub fn validate_upload(&self, bytes: &[u8], uploaded_filename: &str) -> Result<(), ImportError> {
        if bytes.is_empty() {
            return Err(ImportError::Validation("File is empty".to_string()));
        }

        if bytes.len() as u64 > self.max_archive_bytes {
            return Err(ImportError::Validation(format!(
                "File size {} bytes exceeds maximum allowed size of {} bytes",
                bytes.len(),
                self.max_archive_bytes
            )));
        }

        if self.require_zip_extension && !uploaded_filename.to_ascii_lowercase().ends_with(".zip") {
            return Err(ImportError::Validation(format!(
                "Only ZIP files are supported, got '{}'",
                redact_entry_name(uploaded_filename)
            )));
        }

        Ok(())
    }

    /// Reads every supported entry, in archive order.
    ///
    /// Directories and unsupported extensions are skipped. An archive with
    /// nothing left after filtering is an `EmptyArchive` error.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedDocument>, ImportError> {
        if bytes.len() as u64 > self.max_archive_bytes {
            return Err(ImportError::Validation(format!(
                "File size {} bytes exceeds maximum allowed size of {} bytes",
                bytes.len(),
                self.max_archive_bytes
            )));
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ImportError::Validation(format!("Not a readable ZIP archive: {}", e)))?;

        let mut documents = Vec::new();

        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|e| ImportError::Validation(format!("Unreadable archive entry #{}: {}", index, e)))?;

            if entry.is_dir() {
                continue;
            }

            let filename = entry.name().to_string();
            let Some((extension, format)) = self.classify(&filename) else {
                debug!(entry = %redact_entry_name(&filename), "Skipping unsupported archive entry");
                continue;
            };

            if entry.size() > self.max_entry_bytes {
                return Err(ImportError::Validation(format!(
                    "Entry '{}' is {} bytes, above the {} byte limit",
                    redact_entry_name(&filename),
                    entry.size(),
                    self.max_entry_bytes
                )));
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .take(self.max_entry_bytes + 1)
                .read_to_end(&mut data)
                .map_err(|e| {
                    ImportError::Validation(format!(
                        "Failed to read entry '{}': {}",
                        redact_entry_name(&filename),
                        e
                    ))
                })?;

            // Declared sizes can lie; the take() above is the real bound.
            if data.len() as u64 > self.max_entry_bytes {
                return Err(ImportError::Validation(format!(
                    "Entry '{}' exceeds the {} byte limit",
                    redact_entry_name(&filename),
                    self.max_entry_bytes
                )));
            }

            documents.push(ExtractedDocument {
                filename,
                bytes: data,
                extension,
                format,
            });
        }

        if documents.is_empty() {
            return Err(ImportError::EmptyArchive {
                supported: self.supported_list(),
            });
        }

        debug!(count = documents.len(), "Extracted supported documents");

        Ok(documents)
    }

    fn classify(&self, entry_name: &str) -> Option<(String, DocumentFormat)> {
        let leaf = redact_entry_name(entry_name);
        let extension = Path::new(&leaf).extension()?.to_str()?;
        let extension = normalize_extension(extension);

        if !self.supported_extensions.contains(&extension) {
            return None;
        }

        DocumentFormat::from_extension(&extension).map(|format| (extension, format))
    }
}
