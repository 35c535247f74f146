//! Offer and answer payloads carried inside the encrypted envelope

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::validate::check_len;

/// The media target requested by the host.
pub const MEDIA_TARGET_1080P30: &str = "1080p30";

/// Session description upper bound.
pub const MAX_SDP_CHARS: usize = 30_000;

/// Candidate list upper bound per payload.
pub const MAX_CANDIDATES: usize = 96;

/// Single candidate line upper bound.
pub const MAX_CANDIDATE_CHARS: usize = 2_048;

/// One connectivity candidate as produced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    /// The candidate line itself.
    pub candidate: String,
    /// Media-stream identification tag, when the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media-line index, when the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl CandidateInit {
    fn validate(&self, index: usize) -> Result<()> {
        check_len(
            &format!("iceCandidates[{index}].candidate"),
            &self.candidate,
            1,
            MAX_CANDIDATE_CHARS,
        )
    }
}

/// Coarse description of the sending endpoint, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Platform or user-agent family.
    pub platform: String,
    /// Application version string.
    pub version: String,
}

impl ClientInfo {
    fn validate(&self) -> Result<()> {
        check_len("clientInfo.platform", &self.platform, 0, 64)?;
        check_len("clientInfo.version", &self.version, 0, 32)
    }
}

/// The host's half of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    /// Identifier the joiner must echo back.
    pub session_id: String,
    /// The host's session description.
    pub sdp_offer: String,
    /// Candidates gathered before the packet was sealed.
    pub ice_candidates: Vec<CandidateInit>,
    /// Requested media target.
    pub media_target: String,
    /// Sender diagnostics.
    pub client_info: ClientInfo,
}

/// The joiner's half of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    /// Echoed from the offer.
    pub session_id: String,
    /// The joiner's session description.
    pub sdp_answer: String,
    /// Candidates gathered before the packet was sealed.
    pub ice_candidates: Vec<CandidateInit>,
    /// The media target the joiner accepted.
    pub accepted_media_target: String,
    /// Sender diagnostics.
    pub client_info: ClientInfo,
}

fn validate_common(
    session_id: &str,
    sdp: &str,
    sdp_field: &str,
    candidates: &[CandidateInit],
    client_info: &ClientInfo,
) -> Result<()> {
    check_len("sessionId", session_id, 1, 64)?;
    check_len(sdp_field, sdp, 1, MAX_SDP_CHARS)?;
    if candidates.len() > MAX_CANDIDATES {
        return Err(CodecError::Schema(format!(
            "iceCandidates must hold at most {MAX_CANDIDATES} entries, got {}",
            candidates.len()
        )));
    }
    for (i, candidate) in candidates.iter().enumerate() {
        candidate.validate(i)?;
    }
    client_info.validate()
}

impl OfferPayload {
    /// Check every declared bound.
    pub fn validate(&self) -> Result<()> {
        validate_common(
            &self.session_id,
            &self.sdp_offer,
            "sdpOffer",
            &self.ice_candidates,
            &self.client_info,
        )?;
        check_len("mediaTarget", &self.media_target, 1, 16)
    }

    /// Parse and validate from decrypted bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let payload: OfferPayload = serde_json::from_slice(bytes)
            .map_err(|_| CodecError::Schema("offer payload is not valid JSON".to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Serialize for encryption.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|_| CodecError::Schema("offer payload failed to serialize".to_string()))
    }
}

impl AnswerPayload {
    /// Check every declared bound.
    pub fn validate(&self) -> Result<()> {
        validate_common(
            &self.session_id,
            &self.sdp_answer,
            "sdpAnswer",
            &self.ice_candidates,
            &self.client_info,
        )?;
        check_len("acceptedMediaTarget", &self.accepted_media_target, 1, 16)
    }

    /// Parse and validate from decrypted bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let payload: AnswerPayload = serde_json::from_slice(bytes)
            .map_err(|_| CodecError::Schema("answer payload is not valid JSON".to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Serialize for encryption.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|_| CodecError::Schema("answer payload failed to serialize".to_string()))
    }
}
