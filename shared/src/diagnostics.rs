//! In-call diagnostics: telemetry samples and the bounded two-sided event log

use serde::{Deserialize, Serialize};

/// Events older than this are pruned from the tail of either log.
pub const RETENTION_MS: u64 = 15 * 60 * 1_000;

/// Upper bound on the free-text message field.
pub const MAX_MESSAGE_CHARS: usize = 512;

/// One projected telemetry sample from a statistics report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Round-trip time, milliseconds.
    pub rtt_ms: u32,
    /// Audio jitter, milliseconds.
    pub jitter_ms: u32,
    /// Remote inbound packet loss, percent.
    pub packet_loss_pct: f32,
    /// Outbound video bitrate, kbps.
    pub bitrate_kbps: u32,
    /// Outbound frame width.
    pub frame_width: u32,
    /// Outbound frame height.
    pub frame_height: u32,
    /// Outbound frames per second.
    pub fps: f32,
    /// Local audio level, 0..1.
    pub audio_level: f32,
}

/// One diagnostics event, local or remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsEvent {
    /// Unix milliseconds at the emitting peer.
    pub timestamp: u64,
    /// The emitting peer.
    pub peer_id: String,
    /// Round-trip time, milliseconds.
    pub rtt_ms: u32,
    /// Audio jitter, milliseconds.
    pub jitter_ms: u32,
    /// Packet loss, percent.
    pub packet_loss_pct: f32,
    /// Outbound bitrate, kbps.
    pub bitrate_kbps: u32,
    /// Frame width.
    pub frame_width: u32,
    /// Frame height.
    pub frame_height: u32,
    /// Frames per second.
    pub fps: f32,
    /// Audio level, 0..1.
    pub audio_level: f32,
    /// Event kind: `stats`, `state`, `quality`, or `note`.
    pub event_type: String,
    /// Free text, truncated to 512 characters.
    pub message: String,
}

impl DiagnosticsEvent {
    /// Build an event from a telemetry sample.
    pub fn from_sample(
        timestamp: u64,
        peer_id: &str,
        sample: &TelemetrySample,
        event_type: &str,
        message: &str,
    ) -> Self {
        Self {
            timestamp,
            peer_id: peer_id.to_string(),
            rtt_ms: sample.rtt_ms,
            jitter_ms: sample.jitter_ms,
            packet_loss_pct: sample.packet_loss_pct,
            bitrate_kbps: sample.bitrate_kbps,
            frame_width: sample.frame_width,
            frame_height: sample.frame_height,
            fps: sample.fps,
            audio_level: sample.audio_level,
            event_type: event_type.to_string(),
            message: message.chars().take(MAX_MESSAGE_CHARS).collect(),
        }
    }
}

/// Bounded chronological merge of local and remote telemetry events.
///
/// Owned exclusively by one call controller; both sequences are append-only
/// with a fifteen-minute retention window enforced on every insert.
#[derive(Debug, Default)]
pub struct DiagnosticsLog {
    local: Vec<DiagnosticsEvent>,
    remote: Vec<DiagnosticsEvent>,
}

impl DiagnosticsLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally produced event.
    pub fn insert_local(&mut self, event: DiagnosticsEvent) {
        let now = event.timestamp;
        self.local.push(event);
        prune(&mut self.local, now);
        prune(&mut self.remote, now);
    }

    /// Append an event received from the peer.
    pub fn insert_remote(&mut self, event: DiagnosticsEvent) {
        let now = event.timestamp;
        self.remote.push(event);
        prune(&mut self.local, now);
        prune(&mut self.remote, now);
    }

    /// Number of retained local events.
    pub fn local_count(&self) -> usize {
        self.local.len()
    }

    /// Number of retained remote events.
    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    /// Both sequences merged into a stable timestamp order.
    pub fn merged_events(&self) -> Vec<DiagnosticsEvent> {
        let mut events: Vec<DiagnosticsEvent> =
            self.local.iter().chain(self.remote.iter()).cloned().collect();
        events.sort_by_key(|event| event.timestamp);
        events
    }

    /// Export the merged view as a JSON document.
    pub fn export_merged_json(&self, exported_at: u64) -> String {
        let document = serde_json::json!({
            "exportedAt": exported_at,
            "localCount": self.local.len(),
            "remoteCount": self.remote.len(),
            "events": self.merged_events(),
        });
        // serialization of plain data cannot fail in practice
        serde_json::to_string(&document).unwrap_or_default()
    }
}

fn prune(events: &mut Vec<DiagnosticsEvent>, now: u64) {
    let cutoff = now.saturating_sub(RETENTION_MS);
    let keep_from = events
        .iter()
        .position(|event| event.timestamp >= cutoff)
        .unwrap_or(events.len());
    if keep_from > 0 {
        events.drain(..keep_from);
    }
}
