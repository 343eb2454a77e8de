//! Session settings supplied by the presentation layer
//!
//! These settings control how a streaming run paces and flags samples and
//! how the recorded session is exported. They are separate from
//! [`super::LinkConfig`], which describes the physical connection.
//!
//! # Main Types
//!
//! - [`AcquisitionSettings`] - Pacing, display unit, spike flagging
//! - [`ExportSettings`] - CSV export options

use crate::analysis::{DistanceUnit, DEFAULT_SPIKE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lowest accepted sample interval in milliseconds
pub const MIN_SAMPLE_RATE_MS: u64 = 10;

/// Highest accepted sample interval in milliseconds
pub const MAX_SAMPLE_RATE_MS: u64 = 1000;

/// Default sample interval in milliseconds
pub const DEFAULT_SAMPLE_RATE_MS: u64 = 100;

/// Default export file name
pub const DEFAULT_EXPORT_FILE: &str = "distance_log.csv";

/// Settings for one acquisition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Minimum time between forwarded samples
    pub sample_rate_ms: u64,

    /// Display unit for distances
    pub unit: DistanceUnit,

    /// Whether spikes are flagged at all
    pub spike_flagging: bool,

    /// Spike threshold in display units
    pub spike_threshold: f64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_rate_ms: DEFAULT_SAMPLE_RATE_MS,
            unit: DistanceUnit::Meters,
            spike_flagging: true,
            spike_threshold: DEFAULT_SPIKE_THRESHOLD,
        }
    }
}

impl AcquisitionSettings {
    /// Create new settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display unit
    pub fn with_unit(mut self, unit: DistanceUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set the sample interval
    pub fn with_sample_rate_ms(mut self, ms: u64) -> Self {
        self.sample_rate_ms = ms;
        self
    }

    /// Return a copy with the sample interval clamped into the supported range
    pub fn validated(&self) -> Self {
        let clamped = self
            .sample_rate_ms
            .clamp(MIN_SAMPLE_RATE_MS, MAX_SAMPLE_RATE_MS);
        if clamped != self.sample_rate_ms {
            tracing::warn!(
                "Sample rate {} ms out of range, using {} ms",
                self.sample_rate_ms,
                clamped
            );
        }
        let spike_threshold = if self.spike_threshold.is_finite() {
            self.spike_threshold.abs()
        } else {
            DEFAULT_SPIKE_THRESHOLD
        };
        Self {
            sample_rate_ms: clamped,
            spike_threshold,
            ..self.clone()
        }
    }

    /// Sample interval as a duration
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_rate_ms)
    }
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Write `Spike` into the note column for flagged samples
    pub include_spike_notes: bool,

    /// Default output path
    pub file_path: PathBuf,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            include_spike_notes: true,
            file_path: PathBuf::from(DEFAULT_EXPORT_FILE),
        }
    }
}
