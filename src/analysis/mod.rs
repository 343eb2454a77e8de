//! Analysis module for distance readings
//!
//! This module provides the pure, per-sample transforms of the pipeline:
//! - Unit conversion from the wire unit (meters) to a display unit
//! - Spike detection against the previous accepted sample

pub mod spike;
pub mod units;

pub use spike::{SpikeDetector, DEFAULT_SPIKE_THRESHOLD};
pub use units::{round_display, DistanceUnit};
