//! Signal envelope v1 codec
//!
//! An envelope carries one encrypted offer or answer across an untrusted,
//! lossy, human-mediated channel (copy/paste or QR). The pipeline is:
//!
//! ```text
//! payload JSON ── AES-256-GCM ──> envelope JSON ── gzip ── base64url ── chunks
//! ```
//!
//! Each chunk is one line, `P2PV1|<16-hex packetId>|<i>/<N>|<payload>`, at
//! most 900 payload characters. Receivers tolerate duplicated and reordered
//! chunks; a missing chunk is a structural error.
//!
//! The envelope metadata (`version|type|roomCode|createdAt|expiresAt|
//! senderRole`) is bound into the GCM tag as associated data, so any
//! mutation of those fields fails decryption. Chunk metadata (packet id,
//! part counts) is transport-only and never authenticated.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::b64;
use crate::crypto::{self, PBKDF2_ITERATIONS};
use crate::error::{CodecError, Result};
use crate::payload::{AnswerPayload, OfferPayload};
use crate::validate::is_valid_room_code;

/// Envelope wire version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Envelope lifetime: ten minutes from creation.
pub const ENVELOPE_TTL_MS: u64 = 10 * 60 * 1_000;

/// Line prefix identifying a transport chunk.
pub const CHUNK_PREFIX: &str = "P2PV1";

/// Maximum payload characters per chunk.
pub const MAX_CHUNK_PAYLOAD: usize = 900;

/// Maximum chunks per packet.
pub const MAX_CHUNKS: usize = 256;

/// Maximum compressed envelope size in bytes.
pub const MAX_COMPRESSED_BYTES: usize = 120_000;

/// Maximum decompressed envelope size in bytes.
pub const MAX_DECOMPRESSED_BYTES: usize = 350_000;

/// Global cap on pasted packet text.
pub const MAX_PACKET_TEXT: usize = 200_000;

/// Whether a packet carries an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// Host-created session description.
    Offer,
    /// Joiner-created session description.
    Answer,
}

impl PacketKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            PacketKind::Offer => "offer",
            PacketKind::Answer => "answer",
        }
    }
}

/// The role of the endpoint that sealed the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// The endpoint that created the session.
    Host,
    /// The endpoint that joined it.
    Joiner,
}

impl SenderRole {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SenderRole::Host => "host",
            SenderRole::Joiner => "joiner",
        }
    }
}

/// Signal envelope v1.
///
/// Fields are declared in canonical (alphabetical) wire order so the packed
/// JSON is key-ordered without a separate canonicalization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Url-safe base64 AES-GCM ciphertext (tag appended).
    pub ciphertext: String,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Expiry time, unix milliseconds. At most ten minutes past creation.
    pub expires_at: u64,
    /// Url-safe base64 96-bit nonce.
    pub iv: String,
    /// The room code both endpoints agreed on out of band.
    pub room_code: String,
    /// Url-safe base64 random salt, at least 16 bytes.
    pub salt: String,
    /// Which role sealed this packet.
    pub sender_role: SenderRole,
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: PacketKind,
    /// Wire version, always 1.
    pub version: u32,
}

/// Associated data bound into the authentication tag: the ordered
/// concatenation of the envelope metadata fields.
pub fn envelope_aad(envelope: &SignalEnvelope) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        envelope.version,
        envelope.kind.as_str(),
        envelope.room_code,
        envelope.created_at,
        envelope.expires_at,
        envelope.sender_role.as_str()
    )
}

/// Encoder/decoder for signal packets.
///
/// Holds the KDF work factor so tests can run with a reduced cost; the
/// construction is otherwise fixed.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    kdf_iterations: u32,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            kdf_iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl PacketCodec {
    /// Codec with the production KDF work factor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with a reduced KDF work factor. Test use only; the derived key
    /// is incompatible with packets sealed at a different cost.
    pub fn with_kdf_iterations(iterations: u32) -> Self {
        Self {
            kdf_iterations: iterations,
        }
    }

    /// Seal an offer into chunked packet text.
    pub fn encode_offer(
        &self,
        payload: &OfferPayload,
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<String> {
        payload.validate()?;
        let envelope = self.seal(
            PacketKind::Offer,
            SenderRole::Host,
            &payload.to_vec()?,
            room_code,
            passphrase,
            now_ms,
        )?;
        pack_envelope(&envelope)
    }

    /// Seal an answer into chunked packet text.
    pub fn encode_answer(
        &self,
        payload: &AnswerPayload,
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<String> {
        payload.validate()?;
        let envelope = self.seal(
            PacketKind::Answer,
            SenderRole::Joiner,
            &payload.to_vec()?,
            room_code,
            passphrase,
            now_ms,
        )?;
        pack_envelope(&envelope)
    }

    /// Decrypt and validate an offer from a decoded envelope.
    pub fn decrypt_offer(
        &self,
        envelope: &SignalEnvelope,
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<OfferPayload> {
        let plaintext = self.open(envelope, PacketKind::Offer, room_code, passphrase, now_ms)?;
        OfferPayload::from_slice(&plaintext)
    }

    /// Decrypt and validate an answer from a decoded envelope.
    pub fn decrypt_answer(
        &self,
        envelope: &SignalEnvelope,
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<AnswerPayload> {
        let plaintext = self.open(envelope, PacketKind::Answer, room_code, passphrase, now_ms)?;
        AnswerPayload::from_slice(&plaintext)
    }

    fn seal(
        &self,
        kind: PacketKind,
        sender_role: SenderRole,
        plaintext: &[u8],
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<SignalEnvelope> {
        let room_code = room_code.trim();
        if !is_valid_room_code(room_code) {
            return Err(CodecError::Schema(
                "roomCode must be 4-48 characters of [A-Za-z0-9_-]".to_string(),
            ));
        }

        let created_at = now_ms;
        let expires_at = now_ms + ENVELOPE_TTL_MS;
        let salt = crypto::generate_salt();
        let key = crypto::derive_packet_key(passphrase, room_code, &salt, self.kdf_iterations);

        // AAD must match what the receiver recomputes from the envelope.
        let mut envelope = SignalEnvelope {
            ciphertext: String::new(),
            created_at,
            expires_at,
            iv: String::new(),
            room_code: room_code.to_string(),
            salt: b64::encode_url(&salt),
            sender_role,
            kind,
            version: ENVELOPE_VERSION,
        };
        let aad = envelope_aad(&envelope);
        let (nonce, ciphertext) = crypto::encrypt(&key, plaintext, aad.as_bytes())?;
        envelope.iv = b64::encode_url(&nonce);
        envelope.ciphertext = b64::encode_url(&ciphertext);
        Ok(envelope)
    }

    fn open(
        &self,
        envelope: &SignalEnvelope,
        expected_kind: PacketKind,
        room_code: &str,
        passphrase: &str,
        now_ms: u64,
    ) -> Result<Vec<u8>> {
        // The room code is a key-derivation input, so a mismatch is reported
        // exactly like a wrong passphrase.
        if envelope.room_code != room_code.trim() {
            return Err(CodecError::DecryptionFailed);
        }
        if now_ms > envelope.expires_at {
            return Err(CodecError::PacketExpired);
        }
        if envelope.kind != expected_kind {
            return Err(CodecError::Schema(format!(
                "expected an {} packet, got {}",
                expected_kind.as_str(),
                envelope.kind.as_str()
            )));
        }
        let expected_role = match envelope.kind {
            PacketKind::Offer => SenderRole::Host,
            PacketKind::Answer => SenderRole::Joiner,
        };
        if envelope.sender_role != expected_role {
            return Err(CodecError::Schema(
                "sender role does not match packet type".to_string(),
            ));
        }

        let salt = b64::decode_url(&envelope.salt)?;
        let iv = b64::decode_url(&envelope.iv)?;
        let ciphertext = b64::decode_url(&envelope.ciphertext)?;

        let aad = envelope_aad(envelope);
        let key =
            crypto::derive_packet_key(passphrase, &envelope.room_code, &salt, self.kdf_iterations);
        crypto::decrypt(&key, &iv, &ciphertext, aad.as_bytes())
    }
}

// ── Packing ─────────────────────────────────────────────────────────────────

/// Serialize, compress, encode, and chunk an envelope into packet text.
pub fn pack_envelope(envelope: &SignalEnvelope) -> Result<String> {
    let json = serde_json::to_string(envelope)
        .map_err(|_| CodecError::Malformed("envelope failed to serialize".to_string()))?;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|_| CodecError::Malformed("compression failed".to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|_| CodecError::Malformed("compression failed".to_string()))?;
    if compressed.len() > MAX_COMPRESSED_BYTES {
        return Err(CodecError::PacketTooLarge);
    }
    chunk_text(&b64::encode_url(&compressed))
}

fn chunk_text(encoded: &str) -> Result<String> {
    // base64url is pure ASCII, so byte chunks are valid char boundaries
    let parts: Vec<&str> = encoded
        .as_bytes()
        .chunks(MAX_CHUNK_PAYLOAD)
        .map(|chunk| std::str::from_utf8(chunk).expect("base64 is ASCII"))
        .collect();
    if parts.is_empty() {
        return Err(CodecError::Malformed("empty envelope".to_string()));
    }
    if parts.len() > MAX_CHUNKS {
        return Err(CodecError::PacketTooLarge);
    }

    let packet_id = new_packet_id();
    let total = parts.len();
    let text = parts
        .iter()
        .enumerate()
        .map(|(i, part)| format!("{CHUNK_PREFIX}|{packet_id}|{}/{total}|{part}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    if text.len() > MAX_PACKET_TEXT {
        return Err(CodecError::PacketTooLarge);
    }
    Ok(text)
}

/// Random 16-hex-character packet identifier.
fn new_packet_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Decoding ────────────────────────────────────────────────────────────────

struct ChunkRef<'a> {
    packet_id: &'a str,
    index: usize,
    total: usize,
    payload: &'a str,
}

fn parse_chunk(line: &str) -> Result<ChunkRef<'_>> {
    let mut fields = line.splitn(4, '|');
    let prefix = fields.next().unwrap_or("");
    let packet_id = fields.next().unwrap_or("");
    let position = fields.next().unwrap_or("");
    let payload = fields
        .next()
        .ok_or_else(|| CodecError::Malformed("chunk is missing fields".to_string()))?;

    if prefix != CHUNK_PREFIX {
        return Err(CodecError::Malformed("unknown chunk prefix".to_string()));
    }
    if packet_id.len() != 16 || !packet_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodecError::Malformed("invalid packet id".to_string()));
    }
    let (index, total) = position
        .split_once('/')
        .ok_or_else(|| CodecError::Malformed("invalid chunk position".to_string()))?;
    let index: usize = index
        .parse()
        .map_err(|_| CodecError::Malformed("invalid chunk index".to_string()))?;
    let total: usize = total
        .parse()
        .map_err(|_| CodecError::Malformed("invalid chunk count".to_string()))?;
    if total == 0 || total > MAX_CHUNKS {
        return Err(CodecError::Malformed("chunk count out of range".to_string()));
    }
    if index == 0 || index > total {
        return Err(CodecError::Malformed("chunk index out of range".to_string()));
    }
    if payload.is_empty() || payload.len() > MAX_CHUNK_PAYLOAD {
        return Err(CodecError::Malformed(
            "chunk payload length out of range".to_string(),
        ));
    }
    Ok(ChunkRef {
        packet_id,
        index,
        total,
        payload,
    })
}

/// Reassemble packet text into a validated envelope.
///
/// Duplicate chunks are deduplicated by index; ordering does not matter.
/// Chunks from a different packet, a differing part count, or a missing
/// index are structural errors.
pub fn decode_packet(text: &str) -> Result<SignalEnvelope> {
    if text.len() > MAX_PACKET_TEXT {
        return Err(CodecError::PacketTooLarge);
    }

    let mut packet_id: Option<&str> = None;
    let mut part_total: Option<usize> = None;
    let mut parts: BTreeMap<usize, &str> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk = parse_chunk(line)?;
        match packet_id {
            None => packet_id = Some(chunk.packet_id),
            Some(id) if id != chunk.packet_id => {
                return Err(CodecError::Malformed(
                    "chunks belong to different packets".to_string(),
                ));
            }
            Some(_) => {}
        }
        match part_total {
            None => part_total = Some(chunk.total),
            Some(total) if total != chunk.total => {
                return Err(CodecError::Malformed(
                    "chunks disagree on part count".to_string(),
                ));
            }
            Some(_) => {}
        }
        parts.entry(chunk.index).or_insert(chunk.payload);
    }

    let total = part_total.ok_or_else(|| CodecError::Malformed("no chunks found".to_string()))?;
    if parts.len() != total {
        return Err(CodecError::Malformed(format!(
            "expected {total} chunks, found {}",
            parts.len()
        )));
    }

    let mut encoded = String::new();
    for payload in parts.values() {
        encoded.push_str(payload);
    }

    let compressed = b64::decode_url(&encoded)?;
    if compressed.len() > MAX_COMPRESSED_BYTES {
        return Err(CodecError::Malformed(
            "compressed payload too large".to_string(),
        ));
    }

    let json = gunzip_capped(&compressed, MAX_DECOMPRESSED_BYTES)?;
    let envelope: SignalEnvelope = serde_json::from_slice(&json)
        .map_err(|_| CodecError::Malformed("envelope is not valid JSON".to_string()))?;
    validate_envelope(&envelope)?;
    Ok(envelope)
}

fn gunzip_capped(compressed: &[u8], cap: usize) -> Result<Vec<u8>> {
    let decoder = flate2::read::GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .take(cap as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| CodecError::Malformed("packet is not valid gzip".to_string()))?;
    if out.len() > cap {
        return Err(CodecError::Malformed(
            "decompressed payload too large".to_string(),
        ));
    }
    Ok(out)
}

fn validate_envelope(envelope: &SignalEnvelope) -> Result<()> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CodecError::Schema(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if !is_valid_room_code(&envelope.room_code) {
        return Err(CodecError::Schema(
            "roomCode must be 4-48 characters of [A-Za-z0-9_-]".to_string(),
        ));
    }
    if b64::decode_url(&envelope.salt)?.len() < crypto::SALT_LEN {
        return Err(CodecError::Schema("salt is too short".to_string()));
    }
    if b64::decode_url(&envelope.iv)?.len() < crypto::NONCE_LEN {
        return Err(CodecError::Schema("iv is too short".to_string()));
    }
    if b64::decode_url(&envelope.ciphertext)?.len() < 16 {
        return Err(CodecError::Schema("ciphertext is too short".to_string()));
    }
    if envelope.created_at >= envelope.expires_at {
        return Err(CodecError::Schema(
            "createdAt must precede expiresAt".to_string(),
        ));
    }
    if envelope.expires_at - envelope.created_at > ENVELOPE_TTL_MS {
        return Err(CodecError::Schema(
            "lifetime exceeds ten minutes".to_string(),
        ));
    }
    Ok(())
}
