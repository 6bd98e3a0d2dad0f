pub mod doc;
pub mod docx;
pub mod pdf;
pub mod text;

use crate::archive::ExtractedDocument;
use crate::config::schema::DocumentFormat;
use crate::error::DecodeError;
use crate::sanitize::redact_entry_name;

/// Turns the raw bytes of one document into plain text.
pub trait ContentDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError>;
    fn format(&self) -> DocumentFormat;
}

/// One decoder per supported format, selected by an exhaustive match.
pub struct DecoderRegistry {
    text: text::TextDecoder,
    doc: doc::DocDecoder,
    docx: docx::DocxDecoder,
    pdf: pdf::PdfDecoder,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            text: text::TextDecoder::new(),
            doc: doc::DocDecoder::new(),
            docx: docx::DocxDecoder::new(),
            pdf: pdf::PdfDecoder::new(),
        }
    }

    pub fn decoder(&self, format: DocumentFormat) -> &dyn ContentDecoder {
        match format {
            DocumentFormat::Text => &self.text,
            DocumentFormat::Doc => &self.doc,
            DocumentFormat::Docx => &self.docx,
            DocumentFormat::Pdf => &self.pdf,
        }
    }

    pub fn decode(&self, document: &ExtractedDocument) -> Result<String, DecodeError> {
        let _span = tracing::debug_span!(
            "decoder.decode",
            entry = %redact_entry_name(&document.filename),
            format = document.format.extension(),
            bytes = document.bytes.len(),
        )
        .entered();

        self.decoder(document.format).decode(&document.bytes)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
