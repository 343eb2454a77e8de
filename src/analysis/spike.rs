//! Spike detection
//!
//! A sample is a spike when its display-unit distance differs from the
//! previous *accepted* sample by more than the threshold. The threshold is
//! expressed in the active display unit. The first sample of a session is
//! never a spike.
//!
//! Lines rejected by the parser never reach [`SpikeDetector::accept`], so
//! they cannot move the baseline.

use crate::types::Sample;

/// Default spike threshold, in display units
pub const DEFAULT_SPIKE_THRESHOLD: f64 = 10.0;

/// Check `current_value` against the previous accepted sample
pub fn check(previous: Option<&Sample>, current_value: f64, threshold: f64) -> bool {
    previous.is_some_and(|prev| (current_value - prev.distance_display()).abs() > threshold)
}

/// Spike detector holding the last accepted sample of a session
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    threshold: f64,
    previous: Option<Sample>,
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPIKE_THRESHOLD)
    }
}

impl SpikeDetector {
    /// Create a detector with the given threshold (display units)
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.abs(),
            previous: None,
        }
    }

    /// Threshold in display units
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The baseline sample, if any
    pub fn previous(&self) -> Option<&Sample> {
        self.previous.as_ref()
    }

    /// Whether `current_value` is a spike relative to the baseline
    pub fn check(&self, current_value: f64) -> bool {
        check(self.previous.as_ref(), current_value, self.threshold)
    }

    /// Make `sample` the new baseline
    pub fn accept(&mut self, sample: Sample) {
        self.previous = Some(sample);
    }

    /// Forget the baseline (new session)
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
