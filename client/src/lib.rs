//! peerlink call controller
//!
//! Drives one peer-to-peer call against an abstract real-time transport:
//! offer/answer flows, candidate-gathering settle, the in-call control
//! channels, the telemetry loop, adaptive quality, and the connect watchdog.
//! The offline signaling facade wraps the shared packet codec with the
//! boundary defenses (cooldown, taxonomy mapping).

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod channel;
pub mod controller;
pub mod signaling;
pub mod stats;
pub mod transport;

pub use channel::{ChatMessage, MediaState};
pub use controller::{CallCallbacks, CallController, CallError};
pub use signaling::OfflineSignaling;
pub use stats::{StatsProjector, StatsReport};
pub use transport::{
    ConnectionState, DataChannel, GatheringState, MediaError, MediaSource, PeerEvent,
    PeerEventReceiver, PeerTransport, SdpKind, TransportError, VideoConstraints,
};
