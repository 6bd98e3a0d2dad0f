//! Word 97-2003 binary documents.
//!
//! Text is recovered through the piece table: the FIB in the `WordDocument`
//! stream points at the CLX in the table stream, whose PlcPcd maps character
//! positions to byte offsets in `WordDocument`. Only the main document story
//! (the first `ccpText` characters) is read.

use std::io::{Cursor, Read};

use cfb::CompoundFile;

use crate::config::schema::DocumentFormat;
use crate::decoder::ContentDecoder;
use crate::error::DecodeError;

const WORD_IDENT: u16 = 0xA5EC;

const FIB_FLAGS: usize = 0x000A;
const FIB_CCP_TEXT: usize = 0x004C;
const FIB_FC_CLX: usize = 0x01A2;
const FIB_LCB_CLX: usize = 0x01A6;
const FIB_MIN_LEN: usize = FIB_LCB_CLX + 4;

const FLAG_ENCRYPTED: u16 = 0x0100;
const FLAG_WHICH_TABLE: u16 = 0x0200;

const CLX_PRC: u8 = 0x01;
const CLX_PCDT: u8 = 0x02;

const PCD_SIZE: usize = 8;
const FC_COMPRESSED: u32 = 0x4000_0000;

pub struct DocDecoder;

impl DocDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDecoder for DocDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let mut compound = CompoundFile::open(Cursor::new(bytes))
            .map_err(|e| DecodeError::Doc(format!("not an OLE compound document: {}", e)))?;

        let word = read_stream(&mut compound, "/WordDocument")?;
        if word.len() < FIB_MIN_LEN {
            return Err(DecodeError::Doc(format!(
                "WordDocument stream too short for a FIB ({} bytes)",
                word.len()
            )));
        }

        let ident = read_u16(&word, 0)?;
        if ident != WORD_IDENT {
            return Err(DecodeError::Doc(format!(
                "unexpected FIB identifier 0x{:04X}",
                ident
            )));
        }

        let flags = read_u16(&word, FIB_FLAGS)?;
        if flags & FLAG_ENCRYPTED != 0 {
            return Err(DecodeError::Doc("document is encrypted".to_string()));
        }

        let table_name = if flags & FLAG_WHICH_TABLE != 0 {
            "/1Table"
        } else {
            "/0Table"
        };
        let table = read_stream(&mut compound, table_name)?;

        let ccp_text = read_u32(&word, FIB_CCP_TEXT)?;
        let fc_clx = read_u32(&word, FIB_FC_CLX)? as usize;
        let lcb_clx = read_u32(&word, FIB_LCB_CLX)? as usize;

        let clx = fc_clx
            .checked_add(lcb_clx)
            .and_then(|end| table.get(fc_clx..end))
            .ok_or_else(|| DecodeError::Doc("CLX lies outside the table stream".to_string()))?;

        let pieces = parse_piece_table(clx)?;
        let raw = read_pieces(&word, &pieces, ccp_text)?;

        Ok(clean_text(&raw))
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Doc
    }
}

/// A run of characters `[cp_start, cp_end)` stored at `fc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    cp_start: u32,
    cp_end: u32,
    fc: u32,
}

impl Piece {
    fn is_compressed(&self) -> bool {
        self.fc & FC_COMPRESSED != 0
    }
}

fn read_stream(
    compound: &mut CompoundFile<Cursor<&[u8]>>,
    path: &str,
) -> Result<Vec<u8>, DecodeError> {
    let mut stream = compound
        .open_stream(path)
        .map_err(|e| DecodeError::Doc(format!("missing {} stream: {}", path, e)))?;
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(|e| DecodeError::Doc(format!("failed to read {} stream: {}", path, e)))?;
    Ok(data)
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, DecodeError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| DecodeError::Doc(format!("truncated data at offset {}", offset)))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, DecodeError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DecodeError::Doc(format!("truncated data at offset {}", offset)))
}

/// Skips any Prc blocks and decodes the Pcdt's PlcPcd.
fn parse_piece_table(clx: &[u8]) -> Result<Vec<Piece>, DecodeError> {
    let mut pos = 0usize;

    loop {
        match clx.get(pos).copied() {
            Some(CLX_PRC) => {
                let size = read_u16(clx, pos + 1)? as i16;
                if size < 0 {
                    return Err(DecodeError::Doc("negative Prc size in CLX".to_string()));
                }
                pos += 3 + size as usize;
            }
            Some(CLX_PCDT) => {
                let lcb = read_u32(clx, pos + 1)? as usize;
                let start = pos + 5;
                let plc = start
                    .checked_add(lcb)
                    .and_then(|end| clx.get(start..end))
                    .ok_or_else(|| DecodeError::Doc("PlcPcd truncated".to_string()))?;
                return parse_plc_pcd(plc);
            }
            Some(other) => {
                return Err(DecodeError::Doc(format!(
                    "unexpected CLX block type 0x{:02X}",
                    other
                )))
            }
            None => return Err(DecodeError::Doc("CLX has no piece table".to_string())),
        }
    }
}

fn parse_plc_pcd(plc: &[u8]) -> Result<Vec<Piece>, DecodeError> {
    // n + 1 character positions followed by n 8-byte descriptors.
    if plc.len() < 4 + 4 + PCD_SIZE || (plc.len() - 4) % (4 + PCD_SIZE) != 0 {
        return Err(DecodeError::Doc(format!(
            "malformed PlcPcd of {} bytes",
            plc.len()
        )));
    }
    let count = (plc.len() - 4) / (4 + PCD_SIZE);
    let descriptors = (count + 1) * 4;

    let mut pieces = Vec::with_capacity(count);
    for i in 0..count {
        let cp_start = read_u32(plc, i * 4)?;
        let cp_end = read_u32(plc, (i + 1) * 4)?;
        let fc = read_u32(plc, descriptors + i * PCD_SIZE + 2)?;
        if cp_end < cp_start {
            return Err(DecodeError::Doc("piece table is not ascending".to_string()));
        }
        pieces.push(Piece {
            cp_start,
            cp_end,
            fc,
        });
    }

    Ok(pieces)
}

fn read_pieces(word: &[u8], pieces: &[Piece], ccp_text: u32) -> Result<String, DecodeError> {
    let mut text = String::new();

    for piece in pieces {
        if piece.cp_start >= ccp_text {
            break;
        }
        let chars = (piece.cp_end.min(ccp_text) - piece.cp_start) as usize;

        if piece.is_compressed() {
            let offset = ((piece.fc & !FC_COMPRESSED) / 2) as usize;
            let bytes = word
                .get(offset..offset + chars)
                .ok_or_else(|| DecodeError::Doc("text piece outside WordDocument".to_string()))?;
            let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            text.push_str(&decoded);
        } else {
            let offset = piece.fc as usize;
            let bytes = word
                .get(offset..offset + chars * 2)
                .ok_or_else(|| DecodeError::Doc("text piece outside WordDocument".to_string()))?;
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
            text.extend(
                char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)),
            );
        }
    }

    Ok(text)
}

/// Maps Word's control characters to plain text and drops field instructions.
fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // One entry per open field; true while still inside its instruction part.
    let mut fields: Vec<bool> = Vec::new();

    for ch in raw.chars() {
        match ch {
            '\u{13}' => {
                fields.push(true);
                continue;
            }
            '\u{14}' => {
                if let Some(in_instruction) = fields.last_mut() {
                    *in_instruction = false;
                }
                continue;
            }
            '\u{15}' => {
                fields.pop();
                continue;
            }
            _ => {}
        }

        if fields.iter().any(|in_instruction| *in_instruction) {
            continue;
        }

        match ch {
            '\r' | '\u{0B}' | '\u{0C}' => out.push('\n'),
            // cell and row marks
            '\u{07}' => out.push('\t'),
            // non-breaking hyphen
            '\u{1E}' => out.push('-'),
            '\u{00}' | '\u{01}' | '\u{08}' | '\u{1F}' => {}
            '\u{A0}' => out.push(' '),
            c => out.push(c),
        }
    }

    out.trim_end().to_string()
}
