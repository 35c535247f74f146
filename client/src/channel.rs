//! In-call control channel protocol
//!
//! Both data channels carry the same frame envelope:
//! `{"type": "chat" | "control" | "diag", "payload": ...}`.
//! Unknown types and oversized frames are dropped without comment; unknown
//! fields inside a known frame are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use peerlink_shared::diagnostics::DiagnosticsEvent;

/// Label of the reliable chat channel.
pub const CHAT_LABEL: &str = "chat";

/// Label of the reliable diagnostics channel.
pub const DIAG_LABEL: &str = "diag";

/// Incoming frames beyond this length are dropped silently.
pub const MAX_INCOMING_CHARS: usize = 16_000;

/// Maximum chat text length after sanitization.
pub const MAX_CHAT_CHARS: usize = 500;

/// Minimum interval between locally sent chat messages.
pub const CHAT_MIN_INTERVAL_MS: u64 = 250;

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Sanitized message text.
    pub text: String,
    /// Sender clock, unix milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

/// Remote media-state announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    /// Whether the sender's microphone track is enabled.
    pub audio_enabled: bool,
    /// Whether the sender's camera track is enabled.
    pub video_enabled: bool,
    /// Sender clock, unix milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

/// One decoded channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    /// User-visible chat.
    Chat(ChatMessage),
    /// Media-state announcement.
    Control(MediaState),
    /// Mirrored telemetry event.
    Diag(Box<DiagnosticsEvent>),
}

impl ChannelFrame {
    /// Wire name of this frame's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelFrame::Chat(_) => "chat",
            ChannelFrame::Control(_) => "control",
            ChannelFrame::Diag(_) => "diag",
        }
    }
}

/// Encode a frame for sending.
pub fn encode_frame(frame: &ChannelFrame) -> String {
    let payload = match frame {
        ChannelFrame::Chat(message) => serde_json::to_value(message),
        ChannelFrame::Control(state) => serde_json::to_value(state),
        ChannelFrame::Diag(event) => serde_json::to_value(event),
    }
    .unwrap_or(Value::Null);
    serde_json::json!({ "type": frame.type_name(), "payload": payload }).to_string()
}

/// Decode an incoming frame.
///
/// Returns `None` for anything that should be dropped: oversize input,
/// invalid JSON, missing or unknown `type`, or a payload that does not
/// match its type's schema.
pub fn parse_frame(text: &str) -> Option<ChannelFrame> {
    if text.chars().take(MAX_INCOMING_CHARS + 1).count() > MAX_INCOMING_CHARS {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let payload = value.get("payload")?.clone();
    match value.get("type")?.as_str()? {
        "chat" => {
            let message: ChatMessage = serde_json::from_value(payload).ok()?;
            if message.text.is_empty() || message.text.chars().count() > MAX_CHAT_CHARS {
                return None;
            }
            Some(ChannelFrame::Chat(message))
        }
        "control" => serde_json::from_value(payload)
            .ok()
            .map(ChannelFrame::Control),
        "diag" => serde_json::from_value(payload)
            .ok()
            .map(|event| ChannelFrame::Diag(Box::new(event))),
        _ => None,
    }
}

/// Strip control characters, collapse whitespace runs, and cap the length.
pub fn sanitize_chat(raw: &str) -> String {
    let mut out = String::new();
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_control() && !c.is_whitespace() {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
        if out.chars().count() >= MAX_CHAT_CHARS {
            break;
        }
    }
    out
}
