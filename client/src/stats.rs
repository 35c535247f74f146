//! Statistics report model and telemetry projection
//!
//! The transport hands over one [`StatsReport`] per second; the projector
//! reduces it to the flat [`TelemetrySample`] consumed by the quality
//! controller and the diagnostics log.

use peerlink_shared::diagnostics::TelemetrySample;

/// Outbound video stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutboundVideoStats {
    /// Cumulative bytes sent.
    pub bytes_sent: u64,
    /// Current encoded frame width.
    pub frame_width: u32,
    /// Current encoded frame height.
    pub frame_height: u32,
    /// Current encoded frames per second.
    pub frames_per_second: f32,
}

/// Remote peer's view of our outbound video.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RemoteInboundVideoStats {
    /// Cumulative packets lost.
    pub packets_lost: u64,
    /// Cumulative packets received.
    pub packets_received: u64,
    /// Reported round-trip time in seconds.
    pub round_trip_time: f64,
}

/// Inbound audio stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InboundAudioStats {
    /// Jitter in seconds.
    pub jitter: f64,
}

/// Active candidate-pair measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandidatePairStats {
    /// Current round-trip time in seconds.
    pub current_round_trip_time: f64,
}

/// Local audio capture measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioSourceStats {
    /// Instantaneous audio level, 0..1.
    pub audio_level: f32,
}

/// One periodic statistics snapshot from the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsReport {
    /// Outbound video stream.
    pub outbound_video: OutboundVideoStats,
    /// Remote inbound video stream.
    pub remote_inbound_video: RemoteInboundVideoStats,
    /// Inbound audio stream.
    pub inbound_audio: InboundAudioStats,
    /// Selected candidate pair.
    pub candidate_pair: CandidatePairStats,
    /// Local audio source.
    pub audio_source: AudioSourceStats,
}

/// Projects successive reports into telemetry samples.
///
/// Bitrate is a delta over the previous report, so the first sample after
/// construction reports zero.
#[derive(Debug, Default)]
pub struct StatsProjector {
    previous: Option<(u64, u64)>, // (bytes_sent, timestamp_ms)
}

impl StatsProjector {
    /// Fresh projector with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one report to a telemetry sample.
    pub fn project(&mut self, report: &StatsReport, now_ms: u64) -> TelemetrySample {
        let bitrate_kbps = match self.previous {
            Some((bytes, at_ms)) => {
                let delta_bytes = report.outbound_video.bytes_sent.saturating_sub(bytes);
                let delta_ms = now_ms.saturating_sub(at_ms).max(1);
                ((delta_bytes * 8) as f64 / delta_ms as f64).round() as u32
            }
            None => 0,
        };
        self.previous = Some((report.outbound_video.bytes_sent, now_ms));

        let lost = report.remote_inbound_video.packets_lost;
        let received = report.remote_inbound_video.packets_received;
        let packet_loss_pct = (100 * lost) as f32 / (lost + received).max(1) as f32;

        let rtt_seconds = report
            .remote_inbound_video
            .round_trip_time
            .max(report.candidate_pair.current_round_trip_time);

        TelemetrySample {
            rtt_ms: (rtt_seconds * 1_000.0).round() as u32,
            jitter_ms: (report.inbound_audio.jitter * 1_000.0).round() as u32,
            packet_loss_pct,
            bitrate_kbps,
            frame_width: report.outbound_video.frame_width,
            frame_height: report.outbound_video.frame_height,
            fps: report.outbound_video.frames_per_second,
            audio_level: report.audio_source.audio_level,
        }
    }
}
