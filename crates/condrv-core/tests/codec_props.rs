//! Property tests for the byte codec: streaming decode never loses or
//! invents data across arbitrary split points, and the encoder never
//! emits a partial scalar.

use condrv_core::codec::{self, CodePage};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_whole_utf8_strings_round_trips(text in "\\PC{0,64}") {
        let (units, consumed) = codec::decode_stream(CodePage::utf8(), text.as_bytes());
        prop_assert_eq!(consumed, text.len());
        let expected: Vec<u16> = text.encode_utf16().collect();
        prop_assert_eq!(units, expected);
    }

    #[test]
    fn decode_is_split_invariant(text in "\\PC{0,64}", split in 0usize..=64) {
        let bytes = text.as_bytes();
        let split = split.min(bytes.len());

        let (mut units, consumed) = codec::decode_stream(CodePage::utf8(), &bytes[..split]);
        // The undecoded leftover carries into the next poll
        let mut carry = bytes[consumed..split].to_vec();
        carry.extend_from_slice(&bytes[split..]);
        let (rest, rest_consumed) = codec::decode_stream(CodePage::utf8(), &carry);
        units.extend(rest);

        prop_assert_eq!(rest_consumed, carry.len());
        let expected: Vec<u16> = text.encode_utf16().collect();
        prop_assert_eq!(units, expected);
    }

    #[test]
    fn encode_never_emits_partial_scalars(text in "\\PC{0,32}", budget in 0usize..=16) {
        let units: Vec<u16> = text.encode_utf16().collect();
        let (bytes, consumed) = codec::encode_units(CodePage::utf8(), &units, budget);
        prop_assert!(bytes.len() <= budget);
        prop_assert!(consumed <= units.len());
        // Whatever was emitted is valid UTF-8 on its own
        prop_assert!(std::str::from_utf8(&bytes).is_ok());
    }

    #[test]
    fn single_byte_pages_are_length_preserving(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let cp = CodePage::new(1252);
        let (units, consumed) = codec::decode_stream(cp, &bytes);
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(units.len(), bytes.len());
    }
}
