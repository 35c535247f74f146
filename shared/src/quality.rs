//! Adaptive quality ladder driven by periodic telemetry
//!
//! Degradation is immediate (one rung per bad sample), recovery is earned:
//! eight consecutive good samples emit the transient `Recovering` sentinel,
//! which the call layer answers by stepping one rung back up. The sentinel is
//! a signal, never a resting state.

use serde::{Deserialize, Serialize};

use crate::diagnostics::TelemetrySample;

/// Consecutive good samples required before recovery is attempted.
pub const RECOVERY_SAMPLE_COUNT: u32 = 8;

/// One rung of the quality ladder, or the transient recovery sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityLevel {
    /// 1920x1080 at 3500 kbps.
    #[serde(rename = "HD_1080")]
    Hd1080,
    /// 1280x720 at 2000 kbps.
    #[serde(rename = "HD_720")]
    Hd720,
    /// 854x480 at 900 kbps.
    #[serde(rename = "SD_480")]
    Sd480,
    /// Transient: conditions have been good long enough to try stepping up.
    #[serde(rename = "RECOVERING")]
    Recovering,
}

/// Encoder parameters for an active quality level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoder bitrate ceiling in kbps.
    pub max_bitrate_kbps: u32,
}

impl QualityLevel {
    /// Encoder profile for this level. `None` for the sentinel.
    pub fn profile(self) -> Option<QualityProfile> {
        match self {
            QualityLevel::Hd1080 => Some(QualityProfile {
                width: 1920,
                height: 1080,
                max_bitrate_kbps: 3500,
            }),
            QualityLevel::Hd720 => Some(QualityProfile {
                width: 1280,
                height: 720,
                max_bitrate_kbps: 2000,
            }),
            QualityLevel::Sd480 => Some(QualityProfile {
                width: 854,
                height: 480,
                max_bitrate_kbps: 900,
            }),
            QualityLevel::Recovering => None,
        }
    }

    /// One rung down. Saturates at `Sd480`.
    pub fn step_down(self) -> QualityLevel {
        match self {
            QualityLevel::Hd1080 => QualityLevel::Hd720,
            QualityLevel::Hd720 | QualityLevel::Recovering => QualityLevel::Sd480,
            QualityLevel::Sd480 => QualityLevel::Sd480,
        }
    }

    /// One rung up. Saturates at `Hd1080`.
    pub fn step_up(self) -> QualityLevel {
        match self {
            QualityLevel::Sd480 => QualityLevel::Hd720,
            QualityLevel::Hd720 | QualityLevel::Recovering => QualityLevel::Hd1080,
            QualityLevel::Hd1080 => QualityLevel::Hd1080,
        }
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Hd1080 => "HD_1080",
            QualityLevel::Hd720 => "HD_720",
            QualityLevel::Sd480 => "SD_480",
            QualityLevel::Recovering => "RECOVERING",
        }
    }
}

fn is_bad(sample: &TelemetrySample) -> bool {
    sample.packet_loss_pct >= 5.0 || sample.rtt_ms >= 220 || sample.jitter_ms >= 30
}

fn is_good(sample: &TelemetrySample) -> bool {
    sample.packet_loss_pct <= 2.0 && sample.rtt_ms <= 130 && sample.jitter_ms <= 16
}

/// Maps telemetry samples to quality state with hysteresis.
#[derive(Debug)]
pub struct QualityController {
    active: QualityLevel,
    stable_samples: u32,
}

impl Default for QualityController {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityController {
    /// Controller starting at the top of the ladder.
    pub fn new() -> Self {
        Self {
            active: QualityLevel::Hd1080,
            stable_samples: 0,
        }
    }

    /// Current state.
    pub fn active(&self) -> QualityLevel {
        self.active
    }

    /// Feed one sample. Returns the new state if it changed.
    pub fn observe(&mut self, sample: &TelemetrySample) -> Option<QualityLevel> {
        if is_bad(sample) {
            self.stable_samples = 0;
            let next = self.active.step_down();
            if next != self.active {
                self.active = next;
                return Some(next);
            }
            return None;
        }

        if !is_good(sample) {
            self.stable_samples = 0;
            return None;
        }

        self.stable_samples += 1;
        if self.stable_samples >= RECOVERY_SAMPLE_COUNT {
            self.stable_samples = 0;
            if self.active != QualityLevel::Hd1080 {
                self.active = QualityLevel::Recovering;
                return Some(QualityLevel::Recovering);
            }
        }
        None
    }

    /// Override the current state and reset the stability counter.
    pub fn force_state(&mut self, state: QualityLevel) {
        self.active = state;
        self.stable_samples = 0;
    }

    /// Leave the sentinel for the top of the ladder.
    pub fn complete_recovery(&mut self) {
        if self.active == QualityLevel::Recovering {
            self.active = QualityLevel::Hd1080;
            self.stable_samples = 0;
        }
    }
}
