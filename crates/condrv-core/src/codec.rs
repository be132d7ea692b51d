//! Byte stream <-> UTF-16 conversion with a configurable code page.
//!
//! The UTF-8 page is decoded as a stream: only whole scalars are consumed,
//! and a trailing partial sequence stays in the caller's pending buffer.
//! Single-byte pages convert one byte per unit. The encode path never
//! produces a partial UTF-8 scalar; it truncates early instead.

use tracing::trace;

pub const CP_OEM_437: u32 = 437;
pub const CP_WINDOWS_1252: u32 = 1252;
pub const CP_UTF8: u32 = 65001;

/// Active code page of one direction of the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePage(u32);

impl CodePage {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn utf8() -> Self {
        Self(CP_UTF8)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn is_utf8(self) -> bool {
        self.0 == CP_UTF8
    }
}

impl Default for CodePage {
    fn default() -> Self {
        Self(CP_UTF8)
    }
}

/// Outcome of decoding the front of a byte buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A complete scalar and the bytes it consumed
    Scalar(char, usize),
    /// The buffer holds a partial sequence; wait for more bytes
    Incomplete,
}

/// Expected total length of a UTF-8 sequence from its lead byte
fn utf8_sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Decode one scalar from the front of `bytes` under `code_page`.
///
/// Invalid leads and malformed continuations consume one byte and yield
/// U+FFFD so a corrupt stream cannot stall a pending read forever.
pub fn decode_one(code_page: CodePage, bytes: &[u8]) -> Decoded {
    let Some(&lead) = bytes.first() else {
        return Decoded::Incomplete;
    };

    if !code_page.is_utf8() {
        return Decoded::Scalar(char::from(lead), 1);
    }

    let Some(need) = utf8_sequence_len(lead) else {
        trace!("Invalid UTF-8 lead byte 0x{:02x}", lead);
        return Decoded::Scalar(char::REPLACEMENT_CHARACTER, 1);
    };
    if bytes.len() < need {
        return Decoded::Incomplete;
    }

    match std::str::from_utf8(&bytes[..need]) {
        Ok(s) => {
            let ch = s.chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
            Decoded::Scalar(ch, need)
        }
        Err(_) => {
            trace!("Malformed UTF-8 sequence at lead 0x{:02x}", lead);
            Decoded::Scalar(char::REPLACEMENT_CHARACTER, 1)
        }
    }
}

/// Decode as many complete scalars as `bytes` holds; returns the UTF-16
/// units produced and the bytes consumed. Trailing partial sequences are
/// left unconsumed.
pub fn decode_stream(code_page: CodePage, bytes: &[u8]) -> (Vec<u16>, usize) {
    let mut units = Vec::new();
    let mut consumed = 0;

    while consumed < bytes.len() {
        match decode_one(code_page, &bytes[consumed..]) {
            Decoded::Scalar(ch, len) => {
                let mut pair = [0u16; 2];
                units.extend_from_slice(ch.encode_utf16(&mut pair));
                consumed += len;
            }
            Decoded::Incomplete => break,
        }
    }

    (units, consumed)
}

/// Encode a char into the given code page. Characters outside a
/// single-byte page degrade to `?`, the classic console fallback.
pub fn encode_char(code_page: CodePage, ch: char) -> Vec<u8> {
    if code_page.is_utf8() {
        let mut buf = [0u8; 4];
        ch.encode_utf8(&mut buf).as_bytes().to_vec()
    } else if (ch as u32) < 0x100 {
        vec![ch as u8]
    } else {
        vec![b'?']
    }
}

/// Encoded size of a char without producing the bytes
pub fn encoded_len(code_page: CodePage, ch: char) -> usize {
    if code_page.is_utf8() {
        ch.len_utf8()
    } else {
        1
    }
}

/// Encode UTF-16 units into at most `budget` bytes without splitting a
/// scalar's encoding. Returns the bytes and the count of units consumed.
/// A lone surrogate encodes as U+FFFD.
pub fn encode_units(code_page: CodePage, units: &[u16], budget: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::new();
    let mut consumed = 0;

    while consumed < units.len() {
        let unit = units[consumed];
        let (ch, width) = if (0xD800..0xDC00).contains(&unit) {
            match units.get(consumed + 1) {
                Some(&low) if (0xDC00..0xE000).contains(&low) => {
                    let scalar =
                        0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
                    (char::from_u32(scalar).unwrap_or(char::REPLACEMENT_CHARACTER), 2)
                }
                _ => (char::REPLACEMENT_CHARACTER, 1),
            }
        } else if (0xDC00..0xE000).contains(&unit) {
            (char::REPLACEMENT_CHARACTER, 1)
        } else {
            (char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER), 1)
        };

        let encoded = encode_char(code_page, ch);
        if out.len() + encoded.len() > budget {
            break;
        }
        out.extend_from_slice(&encoded);
        consumed += width;
    }

    (out, consumed)
}

/// UTF-16 units for one char (1 for the BMP, 2 for supplementary planes)
pub fn units_of_char(ch: char) -> Vec<u16> {
    let mut pair = [0u16; 2];
    ch.encode_utf16(&mut pair).to_vec()
}
