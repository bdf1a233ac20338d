//! Text codec for the host/guest boundary
//!
//! All text crossing into or out of the guest is UTF-8.

use super::types::{BridgeError, BridgeResult};

/// UTF-8 text codec
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    /// Encode text to its UTF-8 bytes
    pub fn encode(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    /// Encode UTF-16 code units, replacing unpaired surrogates with U+FFFD
    pub fn encode_utf16(units: &[u16]) -> Vec<u8> {
        String::from_utf16_lossy(units).into_bytes()
    }

    /// Decode UTF-8 bytes, rejecting malformed sequences
    pub fn decode(bytes: &[u8]) -> BridgeResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            BridgeError::EncodingFailure(format!(
                "invalid UTF-8 at byte {}",
                e.utf8_error().valid_up_to()
            ))
        })
    }

    /// Decode UTF-8 bytes, replacing malformed sequences with U+FFFD
    pub fn decode_lossy(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for s in ["", "hello", "héllo wörld", "日本語", "emoji 🦀 crab", "a\0b"] {
            let bytes = TextCodec::encode(s);
            assert_eq!(TextCodec::decode(&bytes).unwrap(), s);
        }
    }

    #[test]
    fn test_encode_is_utf8() {
        assert_eq!(TextCodec::encode("é"), vec![0xC3, 0xA9]);
        assert!(TextCodec::encode("").is_empty());
    }

    #[test]
    fn test_unpaired_surrogate_replaced() {
        // 'a', lone high surrogate, 'b'
        let bytes = TextCodec::encode_utf16(&[0x61, 0xD800, 0x62]);
        assert_eq!(TextCodec::decode(&bytes).unwrap(), "a\u{FFFD}b");

        // valid pair encodes to the 4-byte sequence
        let bytes = TextCodec::encode_utf16(&[0xD83E, 0xDD80]);
        assert_eq!(TextCodec::decode(&bytes).unwrap(), "🦀");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let err = TextCodec::decode(&[0x68, 0x69, 0xFF]).unwrap_err();
        assert!(matches!(err, BridgeError::EncodingFailure(_)));
        assert_eq!(TextCodec::decode_lossy(&[0x68, 0x69, 0xFF]), "hi\u{FFFD}");
    }
}
