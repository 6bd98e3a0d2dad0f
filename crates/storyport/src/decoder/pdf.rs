use lopdf::Document;

use crate::config::schema::DocumentFormat;
use crate::decoder::ContentDecoder;
use crate::error::DecodeError;

/// Marker lopdf leaves behind for glyphs in CID fonts it cannot map.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Text layer of a PDF. Scanned pages with no text layer decode to nothing.
pub struct PdfDecoder;

impl PdfDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for PdfDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| DecodeError::Pdf(format!("failed to load PDF: {}", e)))?;

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(DecodeError::Pdf("document has no pages".to_string()));
        }

        let mut text = String::new();
        let mut failed_pages = 0usize;

        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(page_text) => {
                    let cleaned = page_text.replace(IDENTITY_H_PATTERN, "");
                    let cleaned = cleaned.trim_end();
                    if !cleaned.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(cleaned);
                    }
                }
                Err(e) => {
                    failed_pages += 1;
                    tracing::debug!(page = page_num, error = %e, "Failed to extract PDF page text");
                }
            }
        }

        if text.trim().is_empty() {
            if doc.is_encrypted() {
                return Err(DecodeError::Pdf("document is encrypted".to_string()));
            }
            if failed_pages == pages.len() {
                return Err(DecodeError::Pdf(format!(
                    "text extraction failed on all {} page(s)",
                    failed_pages
                )));
            }
        }

        Ok(text)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }
}
