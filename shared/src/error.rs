//! Error types for the signal packet codec and the user-facing failure taxonomy

use thiserror::Error;

/// Errors produced while encoding, decoding, or decrypting signal packets.
///
/// Crypto failures are deliberately opaque: wrong passphrase, wrong room code,
/// tampered metadata, and truncated ciphertext all collapse into
/// [`CodecError::DecryptionFailed`]. Size and structural failures carry a
/// descriptive message that never echoes packet contents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Any authenticated-decryption failure. Intentionally carries no detail.
    #[error("DECRYPTION_FAILED: the packet could not be decrypted")]
    DecryptionFailed,

    /// The envelope's expiry has passed.
    #[error("PACKET_EXPIRED: the signal packet has expired")]
    PacketExpired,

    /// Raw packet text exceeded the global input cap.
    #[error("Packet text is too large.")]
    PacketTooLarge,

    /// Structurally invalid packet text or envelope.
    #[error("Invalid packet: {0}")]
    Malformed(String),

    /// A field failed its declared bounds.
    #[error("Schema violation: {0}")]
    Schema(String),
}

impl CodecError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::DecryptionFailed => "DECRYPTION_FAILED",
            CodecError::PacketExpired => "PACKET_EXPIRED",
            CodecError::PacketTooLarge => "PACKET_TOO_LARGE",
            CodecError::Malformed(_) => "PACKET_MALFORMED",
            CodecError::Schema(_) => "SCHEMA_VIOLATION",
        }
    }
}

/// User-facing failure taxonomy.
///
/// Internal errors collapse into these at the boundary where the user has to
/// act; everything recoverable stays silent below it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// Decryption failed — from the user's point of view, a passphrase problem.
    #[error("PASS_PHRASE_MISMATCH: wrong passphrase or room code")]
    PassphraseMismatch,

    /// The pasted packet is past its ten-minute lifetime.
    #[error("EXPIRED_PACKET: this packet is no longer valid, create a new one")]
    ExpiredPacket,

    /// The transport reported a failed connection.
    #[error("NAT_BLOCKED: a direct connection could not be established")]
    NatBlocked,

    /// Camera or microphone permission was denied.
    #[error("DEVICE_DENIED: camera or microphone access was denied")]
    DeviceDenied,

    /// The platform cannot provide the requested media.
    #[error("MEDIA_UNSUPPORTED: the requested media is not supported")]
    MediaUnsupported,

    /// The connect watchdog fired before the transport connected.
    #[error("CONNECTION_TIMEOUT: the call did not connect in time")]
    ConnectionTimeout,

    /// The packet text exceeds the input cap.
    #[error("PACKET_TOO_LARGE: the packet text exceeds the size limit")]
    PacketTooLarge,

    /// Packet text that parsed but is not a valid envelope.
    #[error("Invalid signal packet: {0}")]
    InvalidPacket(String),

    /// The room code does not match the accepted pattern.
    #[error("ROOM_CODE_INVALID: room codes are 4-48 letters, digits, '-' or '_'")]
    RoomCodeInvalid,

    /// The passphrase is below the minimum length.
    #[error("PASSPHRASE_WEAK: the passphrase is too short")]
    PassphraseWeak,

    /// Too many failed decrypts; attempts are locked out for a minute.
    #[error("SECURITY_COOLDOWN: too many failed attempts, wait a minute")]
    SecurityCooldown,
}

impl CallFailure {
    /// Stable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            CallFailure::PassphraseMismatch => "PASS_PHRASE_MISMATCH",
            CallFailure::ExpiredPacket => "EXPIRED_PACKET",
            CallFailure::NatBlocked => "NAT_BLOCKED",
            CallFailure::DeviceDenied => "DEVICE_DENIED",
            CallFailure::MediaUnsupported => "MEDIA_UNSUPPORTED",
            CallFailure::ConnectionTimeout => "CONNECTION_TIMEOUT",
            CallFailure::PacketTooLarge => "PACKET_TOO_LARGE",
            CallFailure::InvalidPacket(_) => "PACKET_INVALID",
            CallFailure::RoomCodeInvalid => "ROOM_CODE_INVALID",
            CallFailure::PassphraseWeak => "PASSPHRASE_WEAK",
            CallFailure::SecurityCooldown => "SECURITY_COOLDOWN",
        }
    }
}

impl From<CodecError> for CallFailure {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::DecryptionFailed => CallFailure::PassphraseMismatch,
            CodecError::PacketExpired => CallFailure::ExpiredPacket,
            CodecError::PacketTooLarge => CallFailure::PacketTooLarge,
            CodecError::Malformed(detail) | CodecError::Schema(detail) => {
                CallFailure::InvalidPacket(detail)
            }
        }
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
