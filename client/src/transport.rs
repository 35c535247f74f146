//! Seams to the external real-time transport and media capture stacks
//!
//! The call controller never talks to a concrete RTC implementation. It
//! drives these traits and consumes discrete [`PeerEvent`]s delivered over an
//! mpsc channel, so the whole state machine is testable against scripted
//! fakes and portable across transport backends.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use peerlink_shared::error::CallFailure;
use peerlink_shared::payload::CandidateInit;

use crate::stats::StatsReport;

/// Errors from the transport capability.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The operation failed inside the transport stack.
    #[error("transport operation failed: {0}")]
    Failed(String),
    /// The peer or channel is already closed.
    #[error("transport is closed")]
    Closed,
}

/// Errors from the local media capability.
#[derive(Error, Debug, Clone)]
pub enum MediaError {
    /// Camera or microphone permission denied.
    #[error("device permission denied")]
    PermissionDenied,
    /// The platform cannot satisfy the request.
    #[error("media unsupported: {0}")]
    Unsupported(String),
    /// The track rejected a constraint update.
    #[error("constraint rejected: {0}")]
    ConstraintRejected(String),
}

impl MediaError {
    /// Collapse into the user-facing taxonomy.
    pub fn to_failure(&self) -> CallFailure {
        match self {
            MediaError::PermissionDenied => CallFailure::DeviceDenied,
            MediaError::Unsupported(_) | MediaError::ConstraintRejected(_) => {
                CallFailure::MediaUnsupported
            }
        }
    }
}

/// Transport connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly constructed.
    New,
    /// Negotiating.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Temporarily lost.
    Disconnected,
    /// Permanently failed.
    Failed,
    /// Torn down.
    Closed,
}

/// Candidate-gathering lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    /// Not started.
    New,
    /// Candidates are being produced.
    Gathering,
    /// The transport finished gathering.
    Complete,
}

/// Which side of the exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    /// Host-created description.
    Offer,
    /// Joiner-created description.
    Answer,
}

/// Discrete events surfaced by the transport.
pub enum PeerEvent {
    /// A new local candidate; `None` is the end-of-candidates marker.
    Candidate(Option<CandidateInit>),
    /// Gathering state changed.
    GatheringState(GatheringState),
    /// Connection state changed.
    ConnectionState(ConnectionState),
    /// The remote side opened a data channel toward us.
    ChannelOpened {
        /// Channel label.
        label: String,
        /// Handle for sending on the channel.
        channel: Arc<dyn DataChannel>,
    },
    /// A text message arrived on a data channel.
    ChannelMessage {
        /// Channel label.
        label: String,
        /// Raw message text.
        text: String,
    },
}

/// Receiver half of the transport's event stream.
pub type PeerEventReceiver = mpsc::Receiver<PeerEvent>;

/// The real-time transport capability.
///
/// One instance per call, exclusively owned by its controller.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach the local media tracks to the peer.
    fn attach_media(&self, media: Arc<dyn MediaSource>) -> Result<(), TransportError>;

    /// Create an offer description.
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Create an answer description (after the remote offer is applied).
    async fn create_answer(&self) -> Result<String, TransportError>;

    /// Install a local description.
    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), TransportError>;

    /// Install the remote description.
    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), TransportError>;

    /// Ingest one remote candidate.
    async fn add_remote_candidate(&self, candidate: &CandidateInit) -> Result<(), TransportError>;

    /// Open a reliable, ordered data channel.
    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Snapshot the current statistics report.
    async fn collect_stats(&self) -> Result<StatsReport, TransportError>;

    /// Update the video sender's first encoding bitrate ceiling.
    fn set_video_max_bitrate(&self, bitrate_bps: u32) -> Result<(), TransportError>;

    /// Tear the peer down. Idempotent.
    fn close(&self);
}

/// A reliable, ordered text channel.
pub trait DataChannel: Send + Sync {
    /// The channel label.
    fn label(&self) -> &str;

    /// Send one text message in order.
    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// Resolution and frame-rate constraints for the local video track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoConstraints {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub frame_rate: f32,
}

/// The local media source, shared by reference with the UI.
///
/// Only the owning controller mutates track state.
pub trait MediaSource: Send + Sync {
    /// Flip the audio track's enabled flag.
    fn set_audio_enabled(&self, enabled: bool);

    /// Flip the video track's enabled flag.
    fn set_video_enabled(&self, enabled: bool);

    /// Apply resolution/frame-rate constraints to the video track.
    fn apply_video_constraints(&self, constraints: &VideoConstraints) -> Result<(), MediaError>;
}
