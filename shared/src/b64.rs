//! Base64 helpers: url-safe (wire fields, chunk payloads) and standard (TURN)

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::{CodecError, Result};

/// Url-safe base64 without padding.
pub fn encode_url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode url-safe base64 without padding.
pub fn decode_url(text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| CodecError::Malformed("invalid url-safe base64".to_string()))
}

/// Standard base64 with padding.
pub fn encode_std(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 with padding.
pub fn decode_std(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|_| CodecError::Malformed("invalid base64".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_roundtrip_is_unpadded_and_url_safe() {
        let data = b"\xff\xfe\x00binary?&data";
        let encoded = encode_url(data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(decode_url(&encoded).unwrap(), data);
    }

    #[test]
    fn std_roundtrip() {
        let data = b"credential material";
        assert_eq!(decode_std(&encode_std(data)).unwrap(), data);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_url("not base64!!").is_err());
        assert!(decode_std("also not base64!!").is_err());
        // padded input is not valid for the unpadded url alphabet
        assert!(decode_url("AAE=").is_err());
    }

    #[test]
    fn empty_input_roundtrips() {
        assert_eq!(encode_url(b""), "");
        assert_eq!(decode_url("").unwrap(), Vec::<u8>::new());
    }
}
