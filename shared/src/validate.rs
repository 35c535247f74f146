//! Declarative bounds checks for boundary inputs
//!
//! Every string that crosses a trust boundary (pasted packet text, envelope
//! fields, broker query parameters, REST bodies) goes through one of these
//! before being used.

use crate::error::{CallFailure, CodecError, Result};

/// Minimum passphrase length accepted for packet encryption.
pub const MIN_PASSPHRASE_LEN: usize = 6;

/// Maximum peer identifier length after sanitization.
pub const MAX_PEER_ID_LEN: usize = 40;

/// Check a string field against inclusive length bounds.
pub fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(CodecError::Schema(format!(
            "{field} must be {min}..={max} characters, got {len}"
        )));
    }
    Ok(())
}

/// Room codes: 4-48 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_room_code(code: &str) -> bool {
    let len = code.len();
    (4..=48).contains(&len)
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Canonicalize a room code: trim surrounding whitespace, then validate.
///
/// Case is preserved — the room code feeds the key derivation input and both
/// endpoints must agree on the exact bytes.
pub fn canonical_room_code(raw: &str) -> std::result::Result<String, CallFailure> {
    let trimmed = raw.trim();
    if is_valid_room_code(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(CallFailure::RoomCodeInvalid)
    }
}

/// Broker room identifiers: `meet-` followed by 12-64 lowercase alphanumeric
/// characters or hyphens, starting and ending alphanumeric.
pub fn is_valid_room_id(id: &str) -> bool {
    let Some(suffix) = id.strip_prefix("meet-") else {
        return false;
    };
    let len = suffix.len();
    if !(12..=64).contains(&len) {
        return false;
    }
    let bytes = suffix.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(bytes[0])
        && alnum(bytes[len - 1])
        && bytes.iter().all(|&b| alnum(b) || b == b'-')
}

/// Strip a peer identifier down to `[A-Za-z0-9_-]`, truncated to 40 chars.
pub fn sanitize_peer_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_PEER_ID_LEN)
        .collect()
}

/// Reject passphrases below the minimum length.
pub fn check_passphrase(passphrase: &str) -> std::result::Result<(), CallFailure> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(CallFailure::PassphraseWeak);
    }
    Ok(())
}
