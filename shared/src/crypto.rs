//! Passphrase-based authenticated encryption for signal packets
//!
//! A 256-bit key is derived from `passphrase || ":" || roomCode` with
//! PBKDF2-HMAC-SHA-256 over the envelope's random salt, then payloads are
//! sealed with AES-256-GCM. The envelope metadata rides along as associated
//! data, so any mutation of it invalidates the authentication tag.
//!
//! Decryption is fail-closed and opaque: wrong passphrase, wrong room code,
//! tampered associated data, and truncated ciphertext are indistinguishable
//! from the caller's side.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CodecError, Result};

/// PBKDF2-HMAC-SHA-256 iteration count for packet keys.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Random salt length generated for each envelope.
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// A derived packet key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PacketKey([u8; KEY_LEN]);

/// Derive a packet key from the passphrase, room code, and envelope salt.
///
/// The `iterations` knob exists so tests can run with a reduced work factor;
/// production callers use [`PBKDF2_ITERATIONS`].
pub fn derive_packet_key(
    passphrase: &str,
    room_code: &str,
    salt: &[u8],
    iterations: u32,
) -> PacketKey {
    let mut secret = format!("{passphrase}:{room_code}");
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret.as_bytes(), salt, iterations, &mut key);
    secret.zeroize();
    PacketKey(key)
}

/// Fresh random salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Fresh random 96-bit nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key`, binding `aad` into the authentication tag.
///
/// Returns the random nonce and the ciphertext (tag appended).
pub fn encrypt(key: &PacketKey, plaintext: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce_bytes = generate_nonce();
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CodecError::Malformed("encryption failed".to_string()))?;
    Ok((nonce_bytes, ciphertext))
}

/// Decrypt a ciphertext produced by [`encrypt`].
///
/// Every failure mode returns [`CodecError::DecryptionFailed`] with no
/// further detail.
pub fn decrypt(key: &PacketKey, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CodecError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CodecError::DecryptionFailed)
}
