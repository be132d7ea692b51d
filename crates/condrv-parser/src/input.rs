//! Classifier for the host's inbound byte stream.
//!
//! Modern terminals deliver structured key events as `CSI p1;..;p6 _`
//! ("win32-input-mode"); they also answer device queries and report focus
//! changes with sequences that must never surface as typed characters.
//! The classifier looks at a prefix of the pending bytes and says what it
//! is, without consuming anything itself. Callers drain exactly the
//! reported length.

use condrv_common::types::{ControlKeyState, KeyEventRecord};
use tracing::trace;

const ESC: u8 = 0x1B;

/// Classification of the front of the pending input buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSeq {
    /// A complete win32-input-mode key record
    Win32Key { consumed: usize, key: KeyEventRecord },
    /// A complete sequence with no input-record meaning (device attribute
    /// responses, focus reports, any CSI the server does not understand)
    Ignored { consumed: usize },
    /// A cursor position report (`CSI r ; c R`): the answer to a client's
    /// DSR query, delivered to the reader byte for byte
    Passthrough { consumed: usize },
    /// The prefix could still become a sequence; wait for more bytes
    Incomplete,
    /// The first byte is ordinary text for the byte codec
    NotSequence,
}

/// Classify the prefix of `bytes`. Never consumes; `bytes` must start at
/// the front of the pending buffer.
pub fn classify(bytes: &[u8]) -> InputSeq {
    let Some(&first) = bytes.first() else {
        return InputSeq::Incomplete;
    };
    if first != ESC {
        return InputSeq::NotSequence;
    }
    let Some(&second) = bytes.get(1) else {
        // A lone ESC may be the start of a sequence still in flight
        return InputSeq::Incomplete;
    };
    if second != b'[' {
        // ESC followed by anything else is the escape key itself
        return InputSeq::NotSequence;
    }

    // Scan CSI: parameter bytes, then intermediates, then one final byte
    let mut index = 2;
    while index < bytes.len() && (0x30..=0x3F).contains(&bytes[index]) {
        index += 1;
    }
    while index < bytes.len() && (0x20..=0x2F).contains(&bytes[index]) {
        index += 1;
    }
    let Some(&final_byte) = bytes.get(index) else {
        return InputSeq::Incomplete;
    };
    if !(0x40..=0x7E).contains(&final_byte) {
        // Malformed sequence; swallow up to the offending byte
        trace!("Malformed CSI input sequence, dropping {} bytes", index + 1);
        return InputSeq::Ignored {
            consumed: index + 1,
        };
    }

    let consumed = index + 1;
    match final_byte {
        b'_' => match parse_win32_key(&bytes[2..index]) {
            Some(key) => InputSeq::Win32Key { consumed, key },
            None => InputSeq::Ignored { consumed },
        },
        // A DSR answer the server injected on the client's behalf
        b'R' => InputSeq::Passthrough { consumed },
        // DA1 responses (`CSI ? .. c`), focus in/out (`CSI I` / `CSI O`)
        // and every other CSI are consumed without producing a record
        _ => InputSeq::Ignored { consumed },
    }
}

/// Parse `Vk;Sc;Uc;Kd;Cs;Rc` between the CSI introducer and the `_`
/// final. Absent parameters are zero; private markers disqualify.
fn parse_win32_key(params: &[u8]) -> Option<KeyEventRecord> {
    if params.iter().any(|b| !b.is_ascii_digit() && *b != b';') {
        return None;
    }

    let mut values = [0u32; 6];
    for (slot, piece) in values.iter_mut().zip(params.split(|&b| b == b';')) {
        let mut value: u32 = 0;
        for &digit in piece {
            value = value.wrapping_mul(10).wrapping_add(u32::from(digit - b'0'));
        }
        *slot = value;
    }

    Some(KeyEventRecord {
        key_down: values[3] != 0,
        repeat_count: values[5] as u16,
        virtual_key_code: values[0] as u16,
        virtual_scan_code: values[1] as u16,
        unicode_char: values[2] as u16,
        control_key_state: ControlKeyState::from_bits_retain(values[4]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use condrv_common::types::vk;

    #[test]
    fn test_plain_bytes_are_not_sequences() {
        assert_eq!(classify(b"Z"), InputSeq::NotSequence);
        assert_eq!(classify(&[0xC3, 0xA9]), InputSeq::NotSequence);
    }

    #[test]
    fn test_win32_key_character() {
        let seq = b"\x1b[65;0;97;1;0;1_";
        match classify(seq) {
            InputSeq::Win32Key { consumed, key } => {
                assert_eq!(consumed, seq.len());
                assert!(key.key_down);
                assert_eq!(key.virtual_key_code, 65);
                assert_eq!(key.virtual_scan_code, 0);
                assert_eq!(key.unicode_char, u16::from(b'a'));
                assert_eq!(key.control_key_state, ControlKeyState::empty());
                assert_eq!(key.repeat_count, 1);
            }
            other => panic!("Expected win32 key, got {:?}", other),
        }
    }

    #[test]
    fn test_win32_key_arrow() {
        let seq = b"\x1b[38;0;0;1;0;1_";
        match classify(seq) {
            InputSeq::Win32Key { key, .. } => {
                assert_eq!(key.virtual_key_code, vk::VK_UP);
                assert_eq!(key.unicode_char, 0);
            }
            other => panic!("Expected win32 key, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_parameters_default_to_zero() {
        let seq = b"\x1b[65_";
        match classify(seq) {
            InputSeq::Win32Key { key, .. } => {
                assert_eq!(key.virtual_key_code, 65);
                assert_eq!(key.repeat_count, 0);
                assert!(!key.key_down);
            }
            other => panic!("Expected win32 key, got {:?}", other),
        }
    }

    #[test]
    fn test_ctrl_break_variant() {
        let seq = b"\x1b[3;0;0;1;8;1_";
        match classify(seq) {
            InputSeq::Win32Key { key, .. } => {
                assert_eq!(key.virtual_key_code, vk::VK_CANCEL);
                assert!(key.control_key_state.ctrl_pressed());
            }
            other => panic!("Expected win32 key, got {:?}", other),
        }
    }

    #[test]
    fn test_da1_and_focus_are_ignored() {
        assert_eq!(
            classify(b"\x1b[?62;c"),
            InputSeq::Ignored { consumed: 7 }
        );
        assert_eq!(classify(b"\x1b[I"), InputSeq::Ignored { consumed: 3 });
        assert_eq!(classify(b"\x1b[O"), InputSeq::Ignored { consumed: 3 });
    }

    #[test]
    fn test_unknown_csi_is_ignored_not_delivered() {
        assert_eq!(classify(b"\x1b[A"), InputSeq::Ignored { consumed: 3 });
        assert_eq!(
            classify(b"\x1b[1;5Hrest"),
            InputSeq::Ignored { consumed: 6 }
        );
    }

    #[test]
    fn test_cursor_position_report_passes_through() {
        assert_eq!(
            classify(b"\x1b[1;2R"),
            InputSeq::Passthrough { consumed: 6 }
        );
    }

    #[test]
    fn test_incomplete_prefixes() {
        assert_eq!(classify(b"\x1b"), InputSeq::Incomplete);
        assert_eq!(classify(b"\x1b["), InputSeq::Incomplete);
        assert_eq!(classify(b"\x1b[65;0;"), InputSeq::Incomplete);
    }

    #[test]
    fn test_esc_followed_by_text_is_escape_key() {
        assert_eq!(classify(b"\x1bZ"), InputSeq::NotSequence);
    }

    #[test]
    fn test_private_marker_inside_win32_params_is_dropped() {
        assert_eq!(
            classify(b"\x1b[?65;0;97;1;0;1_"),
            InputSeq::Ignored { consumed: 17 }
        );
    }
}
