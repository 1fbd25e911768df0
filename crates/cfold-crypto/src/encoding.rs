//! Base64 helpers shared by every composite format.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cfold_core::{CfoldError, CfoldResult};

pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> CfoldResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| CfoldError::Format(format!("base64 decode: {e}")))
}

/// Base64 of a UTF-8 string, as bytes. Payloads are encoded this way before encryption.
pub fn string_to_b64_bytes(s: &str) -> Vec<u8> {
    STANDARD.encode(s.as_bytes()).into_bytes()
}

/// Inverse of [`string_to_b64_bytes`].
pub fn b64_bytes_to_string(bytes: &[u8]) -> CfoldResult<String> {
    let decoded = STANDARD
        .decode(bytes)
        .map_err(|e| CfoldError::Format(format!("base64 decode of plaintext: {e}")))?;
    String::from_utf8(decoded)
        .map_err(|e| CfoldError::Format(format!("plaintext is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_b64_roundtrip() {
        let bytes = string_to_b64_bytes("{\"filename\":\"a.txt\"}");
        assert_eq!(b64_bytes_to_string(&bytes).unwrap(), "{\"filename\":\"a.txt\"}");
    }

    #[test]
    fn test_pipe_encodes_to_legacy_delimiter() {
        assert_eq!(b64_encode(b"|"), "fA==");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(b64_decode("not base64!"), Err(CfoldError::Format(_))));
    }
}
