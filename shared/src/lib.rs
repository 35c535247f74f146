//! peerlink protocol core
//!
//! Everything two endpoints need to agree on without a server: the encrypted
//! signal-packet codec (offline mode), the offer/answer payload schemas, the
//! adaptive quality ladder, the diagnostics log, and the shared failure
//! taxonomy. Pure and synchronous; the async call controller and the
//! rendezvous broker build on top of this crate.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod b64;
pub mod crypto;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod payload;
pub mod quality;
pub mod validate;

pub use diagnostics::{DiagnosticsEvent, DiagnosticsLog, TelemetrySample};
pub use envelope::{decode_packet, PacketCodec, PacketKind, SenderRole, SignalEnvelope};
pub use error::{CallFailure, CodecError};
pub use guard::DecryptGuard;
pub use payload::{AnswerPayload, CandidateInit, ClientInfo, OfferPayload};
pub use quality::{QualityController, QualityLevel, QualityProfile};

/// Current unix time in milliseconds.
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
