//! Receiver pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum interval between PLI requests, per simulcast quality.
///
/// A zero duration leaves the buffer's default throttle in place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PliThrottleConfig {
    pub low_quality: Duration,
    pub mid_quality: Duration,
    pub high_quality: Duration,
}

impl Default for PliThrottleConfig {
    fn default() -> Self {
        Self {
            low_quality: Duration::from_millis(500),
            mid_quality: Duration::from_secs(1),
            high_quality: Duration::from_secs(1),
        }
    }
}

impl PliThrottleConfig {
    /// Throttle for a spatial layer. Unknown layers get the mid-quality value.
    #[must_use]
    pub fn for_layer(&self, layer: i32) -> Duration {
        match layer {
            0 => self.low_quality,
            1 => self.mid_quality,
            2 => self.high_quality,
            _ => self.mid_quality,
        }
    }
}

/// Active-speaker detection parameters handed to audio buffers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Audio level (negated dBov, 0 loudest .. 127 silence) at or below
    /// which a frame counts as active speech
    pub active_level: u8,
    /// Fraction of observed frames that must be active within the window
    pub min_percentile: u8,
    /// Window over which levels are observed
    pub update_interval: Duration,
    /// Number of windows smoothed into the reported level
    pub smooth_intervals: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            active_level: 35,
            min_percentile: 40,
            update_interval: Duration::from_millis(400),
            smooth_intervals: 2,
        }
    }
}

/// Stream tracker evaluation parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamTrackerConfig {
    /// Length of one evaluation cycle
    pub cycle_duration: Duration,
    /// Packets that must arrive within a cycle for it to count
    pub samples_required: u32,
    /// Consecutive qualifying cycles before a layer lights up
    pub cycles_required: u32,
    /// Idle cycles after which an active layer dims
    pub dim_cycles: u32,
    /// Window used for per-layer bitrate measurement
    pub bitrate_report_interval: Duration,
}

impl Default for StreamTrackerConfig {
    fn default() -> Self {
        Self {
            cycle_duration: Duration::from_millis(500),
            samples_required: 5,
            cycles_required: 4,
            dim_cycles: 2,
            bitrate_report_interval: Duration::from_secs(1),
        }
    }
}
