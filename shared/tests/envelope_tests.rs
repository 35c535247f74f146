//! End-to-end tests for the signal packet codec
//!
//! These exercise the full pipeline: payload -> encrypt -> envelope -> gzip
//! -> base64url -> chunks -> text, and back. The KDF runs at a reduced work
//! factor; the construction is identical to production.

use peerlink_shared::envelope::{decode_packet, PacketCodec, MAX_PACKET_TEXT};
use peerlink_shared::error::CodecError;
use peerlink_shared::payload::{
    AnswerPayload, CandidateInit, ClientInfo, OfferPayload, MEDIA_TARGET_1080P30,
};

const ROOM: &str = "room-1";
const PASSPHRASE: &str = "pass-one";
const NOW_MS: u64 = 1_700_000_000_000;

fn codec() -> PacketCodec {
    PacketCodec::with_kdf_iterations(1_000)
}

fn candidate(index: usize) -> CandidateInit {
    CandidateInit {
        candidate: format!("candidate:{index} 1 UDP 2130706431 192.0.2.{index} 54321 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

fn offer_with_candidates(count: usize) -> OfferPayload {
    OfferPayload {
        session_id: "session-123".to_string(),
        sdp_offer: "v=0\r\n".to_string(),
        ice_candidates: (0..count).map(candidate).collect(),
        media_target: MEDIA_TARGET_1080P30.to_string(),
        client_info: ClientInfo {
            platform: "test".to_string(),
            version: "0.1.0".to_string(),
        },
    }
}

#[test]
fn offer_round_trip_preserves_payload() {
    let payload = offer_with_candidates(40);
    let text = codec()
        .encode_offer(&payload, ROOM, PASSPHRASE, NOW_MS)
        .unwrap();

    for line in text.lines() {
        assert!(line.starts_with("P2PV1|"));
    }

    let envelope = decode_packet(&text).unwrap();
    let decrypted = codec()
        .decrypt_offer(&envelope, ROOM, PASSPHRASE, NOW_MS + 1_000)
        .unwrap();
    assert_eq!(decrypted, payload);
}

#[test]
fn answer_round_trip_preserves_payload() {
    let payload = AnswerPayload {
        session_id: "session-123".to_string(),
        sdp_answer: "v=0\r\na=answer\r\n".to_string(),
        ice_candidates: vec![candidate(1)],
        accepted_media_target: MEDIA_TARGET_1080P30.to_string(),
        client_info: ClientInfo {
            platform: "test".to_string(),
            version: "0.1.0".to_string(),
        },
    };
    let text = codec()
        .encode_answer(&payload, ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let envelope = decode_packet(&text).unwrap();
    let decrypted = codec()
        .decrypt_answer(&envelope, ROOM, PASSPHRASE, NOW_MS + 1_000)
        .unwrap();
    assert_eq!(decrypted, payload);
}

#[test]
fn expired_packet_rejected_with_correct_passphrase() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let envelope = decode_packet(&text).unwrap();

    let after_expiry = envelope.expires_at + 1;
    let err = codec()
        .decrypt_offer(&envelope, ROOM, PASSPHRASE, after_expiry)
        .unwrap_err();
    assert_eq!(err, CodecError::PacketExpired);
    assert!(err.to_string().contains("PACKET_EXPIRED"));
}

#[test]
fn metadata_tamper_fails_decryption() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let mut envelope = decode_packet(&text).unwrap();

    envelope.created_at += 1;
    envelope.expires_at += 1;
    let err = codec()
        .decrypt_offer(&envelope, ROOM, PASSPHRASE, NOW_MS + 1_000)
        .unwrap_err();
    assert_eq!(err, CodecError::DecryptionFailed);
}

#[test]
fn tampered_room_code_fails_decryption() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let mut envelope = decode_packet(&text).unwrap();

    envelope.room_code = "room-2".to_string();
    let err = codec()
        .decrypt_offer(&envelope, "room-2", PASSPHRASE, NOW_MS + 1_000)
        .unwrap_err();
    assert_eq!(err, CodecError::DecryptionFailed);
}

#[test]
fn wrong_passphrase_fails_opaquely() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let envelope = decode_packet(&text).unwrap();
    let err = codec()
        .decrypt_offer(&envelope, ROOM, "pass-two", NOW_MS + 1_000)
        .unwrap_err();
    assert_eq!(err, CodecError::DecryptionFailed);
}

#[test]
fn wrong_room_code_fails_opaquely() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let envelope = decode_packet(&text).unwrap();
    let err = codec()
        .decrypt_offer(&envelope, "room-9", PASSPHRASE, NOW_MS + 1_000)
        .unwrap_err();
    assert_eq!(err, CodecError::DecryptionFailed);
}

#[test]
fn kind_and_role_cross_check() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let envelope = decode_packet(&text).unwrap();

    // an offer packet is not acceptable where an answer is expected
    let err = codec()
        .decrypt_answer(&envelope, ROOM, PASSPHRASE, NOW_MS + 1_000)
        .unwrap_err();
    assert!(matches!(err, CodecError::Schema(_)));
}

#[test]
fn oversize_input_rejected() {
    let text = "x".repeat(MAX_PACKET_TEXT + 1);
    let err = decode_packet(&text).unwrap_err();
    assert_eq!(err.to_string(), "Packet text is too large.");
}

#[test]
fn reordered_and_duplicated_chunks_decode_identically() {
    // enough candidates to force several chunks
    let text = codec()
        .encode_offer(&offer_with_candidates(96), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.len() >= 2, "expected a multi-chunk packet");

    let baseline = decode_packet(&text).unwrap();

    let mut shuffled: Vec<&str> = lines.iter().rev().copied().collect();
    shuffled.push(lines[0]); // duplicate
    shuffled.push(lines[lines.len() / 2]); // duplicate
    let reassembled = decode_packet(&shuffled.join("\n")).unwrap();
    assert_eq!(reassembled, baseline);
}

#[test]
fn missing_chunk_is_a_structural_error() {
    let text = codec()
        .encode_offer(&offer_with_candidates(96), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.len() >= 2, "expected a multi-chunk packet");

    for skip in 0..lines.len() {
        let partial: Vec<&str> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, line)| *line)
            .collect();
        let err = decode_packet(&partial.join("\n")).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}

#[test]
fn mixed_packet_ids_rejected() {
    let first = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let second = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let mixed = format!("{first}\n{second}");
    assert!(decode_packet(&mixed).is_err());
}

#[test]
fn blank_lines_are_tolerated() {
    let text = codec()
        .encode_offer(&offer_with_candidates(1), ROOM, PASSPHRASE, NOW_MS)
        .unwrap();
    let padded = format!("\n\n{text}\n\n");
    assert!(decode_packet(&padded).is_ok());
}
