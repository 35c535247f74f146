//! Offline signaling facade
//!
//! Wraps the packet codec with the input validation and brute-force defense
//! that belong at the user boundary: room-code canonicalization, passphrase
//! strength, the decrypt cooldown, and the collapse of internal codec errors
//! into the user-facing taxonomy.

use std::sync::Mutex;

use peerlink_shared::envelope::{decode_packet, PacketCodec};
use peerlink_shared::error::{CallFailure, CodecError};
use peerlink_shared::guard::DecryptGuard;
use peerlink_shared::payload::{AnswerPayload, OfferPayload};
use peerlink_shared::unix_now_ms;
use peerlink_shared::validate::{canonical_room_code, check_passphrase};

/// One offline signaling context per call attempt.
#[derive(Debug)]
pub struct OfflineSignaling {
    codec: PacketCodec,
    guard: Mutex<DecryptGuard>,
    room_code: String,
    passphrase: String,
}

impl OfflineSignaling {
    /// Validate the user's room code and passphrase and build the context.
    pub fn new(room_code: &str, passphrase: &str) -> Result<Self, CallFailure> {
        let room_code = canonical_room_code(room_code)?;
        check_passphrase(passphrase)?;
        Ok(Self {
            codec: PacketCodec::new(),
            guard: Mutex::new(DecryptGuard::new()),
            room_code,
            passphrase: passphrase.to_string(),
        })
    }

    /// Context with a reduced KDF work factor, for tests.
    pub fn with_codec(room_code: &str, passphrase: &str, codec: PacketCodec) -> Result<Self, CallFailure> {
        let mut signaling = Self::new(room_code, passphrase)?;
        signaling.codec = codec;
        Ok(signaling)
    }

    /// The canonical room code in use.
    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// Seal an offer into packet text.
    pub fn encode_offer(&self, payload: &OfferPayload) -> Result<String, CallFailure> {
        self.codec
            .encode_offer(payload, &self.room_code, &self.passphrase, unix_now_ms())
            .map_err(CallFailure::from)
    }

    /// Seal an answer into packet text.
    pub fn encode_answer(&self, payload: &AnswerPayload) -> Result<String, CallFailure> {
        self.codec
            .encode_answer(payload, &self.room_code, &self.passphrase, unix_now_ms())
            .map_err(CallFailure::from)
    }

    /// Decode pasted packet text and decrypt the offer inside it.
    pub fn receive_offer(&self, text: &str, now_ms: u64) -> Result<OfferPayload, CallFailure> {
        self.guarded(now_ms, |codec, room, passphrase| {
            let envelope = decode_packet(text)?;
            codec.decrypt_offer(&envelope, room, passphrase, now_ms)
        })
    }

    /// Decode pasted packet text and decrypt the answer inside it.
    pub fn receive_answer(&self, text: &str, now_ms: u64) -> Result<AnswerPayload, CallFailure> {
        self.guarded(now_ms, |codec, room, passphrase| {
            let envelope = decode_packet(text)?;
            codec.decrypt_answer(&envelope, room, passphrase, now_ms)
        })
    }

    fn guarded<T>(
        &self,
        now_ms: u64,
        operation: impl FnOnce(&PacketCodec, &str, &str) -> Result<T, CodecError>,
    ) -> Result<T, CallFailure> {
        self.guard.lock().unwrap().check(now_ms)?;
        match operation(&self.codec, &self.room_code, &self.passphrase) {
            Ok(value) => {
                self.guard.lock().unwrap().record_success();
                Ok(value)
            }
            Err(err) => {
                // only crypto failures count toward the cooldown
                if err == CodecError::DecryptionFailed {
                    self.guard.lock().unwrap().record_failure(now_ms);
                }
                Err(CallFailure::from(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_shared::payload::{CandidateInit, ClientInfo, MEDIA_TARGET_1080P30};

    fn offer() -> OfferPayload {
        OfferPayload {
            session_id: "session-123".to_string(),
            sdp_offer: "v=0\r\n".to_string(),
            ice_candidates: vec![CandidateInit {
                candidate: "candidate:1 1 UDP 1 192.0.2.1 1 typ host".to_string(),
                sdp_mid: None,
                sdp_m_line_index: None,
            }],
            media_target: MEDIA_TARGET_1080P30.to_string(),
            client_info: ClientInfo {
                platform: "test".to_string(),
                version: "0".to_string(),
            },
        }
    }

    fn signaling(passphrase: &str) -> OfflineSignaling {
        OfflineSignaling::with_codec(
            "room-1",
            passphrase,
            PacketCodec::with_kdf_iterations(1_000),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_room_code() {
        assert_eq!(
            OfflineSignaling::new("no spaces", "long-enough").unwrap_err(),
            CallFailure::RoomCodeInvalid
        );
    }

    #[test]
    fn rejects_weak_passphrase() {
        assert_eq!(
            OfflineSignaling::new("room-1", "tiny").unwrap_err(),
            CallFailure::PassphraseWeak
        );
    }

    #[test]
    fn wrong_passphrase_surfaces_as_mismatch() {
        let sender = signaling("pass-one");
        let receiver = signaling("pass-two");
        let text = sender.encode_offer(&offer()).unwrap();
        let err = receiver
            .receive_offer(&text, peerlink_shared::unix_now_ms())
            .unwrap_err();
        assert_eq!(err, CallFailure::PassphraseMismatch);
    }

    #[test]
    fn five_failures_lock_out_further_attempts() {
        let sender = signaling("pass-one");
        let receiver = signaling("pass-two");
        let text = sender.encode_offer(&offer()).unwrap();
        let now = peerlink_shared::unix_now_ms();

        for _ in 0..5 {
            assert_eq!(
                receiver.receive_offer(&text, now).unwrap_err(),
                CallFailure::PassphraseMismatch
            );
        }
        assert_eq!(
            receiver.receive_offer(&text, now).unwrap_err(),
            CallFailure::SecurityCooldown
        );
    }

    #[test]
    fn structural_failures_do_not_count_toward_cooldown() {
        let receiver = signaling("pass-one");
        let now = peerlink_shared::unix_now_ms();
        for _ in 0..10 {
            assert!(matches!(
                receiver.receive_offer("garbage", now).unwrap_err(),
                CallFailure::InvalidPacket(_)
            ));
        }
        // still no cooldown
        assert!(matches!(
            receiver.receive_offer("garbage", now).unwrap_err(),
            CallFailure::InvalidPacket(_)
        ));
    }

    #[test]
    fn successful_decrypt_resets_the_counter() {
        let sender = signaling("pass-one");
        let good = signaling("pass-one");
        let bad = signaling("pass-two");
        let text = sender.encode_offer(&offer()).unwrap();
        let now = peerlink_shared::unix_now_ms();

        for _ in 0..4 {
            let _ = bad.receive_offer(&text, now);
        }
        assert!(good.receive_offer(&text, now).is_ok());
    }
}
