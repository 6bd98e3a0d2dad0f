use std::io::{Cursor, Read};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::schema::DocumentFormat;
use crate::decoder::ContentDecoder;
use crate::error::DecodeError;

const DOCUMENT_PART: &str = "word/document.xml";

/// Upper bound on the decompressed size of `word/document.xml`.
pub const DEFAULT_MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

/// Office Open XML word-processing documents.
pub struct DocxDecoder {
    max_part_bytes: u64,
}

impl DocxDecoder {
    pub fn new() -> Self {
        Self::with_part_limit(DEFAULT_MAX_PART_BYTES)
    }

    pub fn with_part_limit(max_part_bytes: u64) -> Self {
        Self { max_part_bytes }
    }
}

impl Default for DocxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for DocxDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| DecodeError::Docx(format!("not an OOXML package: {}", e)))?;

        let mut part = archive
            .by_name(DOCUMENT_PART)
            .map_err(|e| DecodeError::Docx(format!("missing {}: {}", DOCUMENT_PART, e)))?;

        if part.size() > self.max_part_bytes {
            return Err(DecodeError::Docx("document part too large".to_string()));
        }

        // The declared size can lie, so the read itself is bounded too.
        let mut xml = String::new();
        (&mut part)
            .take(self.max_part_bytes + 1)
            .read_to_string(&mut xml)
            .map_err(|e| DecodeError::Docx(format!("failed to read {}: {}", DOCUMENT_PART, e)))?;
        if xml.len() as u64 > self.max_part_bytes {
            return Err(DecodeError::Docx("document part too large".to_string()));
        }

        parse_document_xml(&xml)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Docx
    }
}

/// Collects `w:t` runs, one line per `w:p`.
///
/// Whitespace inside runs is significant, so the reader must not trim text.
pub(crate) fn parse_document_xml(xml: &str) -> Result<String, DecodeError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    let decoded = e
                        .decode()
                        .map_err(|e| DecodeError::Docx(format!("bad text encoding: {}", e)))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if in_text {
                    match r.resolve_char_ref() {
                        Ok(Some(ch)) => text.push(ch),
                        Ok(None) => {
                            let name = r
                                .decode()
                                .map_err(|e| DecodeError::Docx(format!("bad entity: {}", e)))?;
                            let resolved = resolve_predefined_entity(&name).ok_or_else(|| {
                                DecodeError::Docx(format!("unknown entity &{};", name))
                            })?;
                            text.push_str(resolved);
                        }
                        Err(e) => {
                            return Err(DecodeError::Docx(format!("bad character reference: {}", e)))
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DecodeError::Docx(format!(
                    "XML parsing error at {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(text.trim_end().to_string())
}
