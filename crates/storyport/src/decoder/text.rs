use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::config::schema::DocumentFormat;
use crate::decoder::ContentDecoder;
use crate::error::DecodeError;

/// Plain text in whatever encoding the author's editor chose.
///
/// A BOM wins, then strict UTF-8, then a charset guess.
pub struct TextDecoder;

impl TextDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for TextDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let text = decode_bytes(bytes);

        if text.contains('\0') {
            return Err(DecodeError::Text(
                "content looks binary (contains NUL characters)".to_string(),
            ));
        }

        Ok(normalize_newlines(&text))
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Text
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    tracing::debug!(encoding = encoding.name(), "Guessed text encoding");

    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
