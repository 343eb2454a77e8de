//! Core data types for the distance monitor
//!
//! This module defines the fundamental data structures shared by the
//! acquisition pipeline and its consumers.
//!
//! # Key Types
//!
//! - [`Sample`] - One accepted distance reading
//! - [`LinkState`] - Lifecycle state of a serial link
//! - [`AcquisitionStats`] - Counters for the running session
//! - [`PortInfo`] - A serial port discovered on the host

use crate::analysis::units::{round_display, DistanceUnit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One accepted distance reading
///
/// Built by the acquisition loop after the line parsed, the distance was
/// converted and the spike check ran. Fields are read-only once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    timestamp_ms: u64,
    distance_base: f64,
    distance_display: f64,
    unit: DistanceUnit,
    is_spike: bool,
}

impl Sample {
    /// Create a sample from a base-unit distance, converting it to `unit`
    pub fn new(timestamp_ms: u64, distance_m: f64, unit: DistanceUnit, is_spike: bool) -> Self {
        Self {
            timestamp_ms,
            distance_base: distance_m,
            distance_display: unit.convert(distance_m),
            unit,
            is_spike,
        }
    }

    /// Device timestamp in milliseconds
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Distance in meters, as received
    pub fn distance_base(&self) -> f64 {
        self.distance_base
    }

    /// Distance in the display unit, full precision
    pub fn distance_display(&self) -> f64 {
        self.distance_display
    }

    /// Distance in the display unit, rounded for presentation
    pub fn distance_rounded(&self) -> f64 {
        round_display(self.distance_display)
    }

    /// Display unit
    pub fn unit(&self) -> DistanceUnit {
        self.unit
    }

    /// Whether this sample jumped away from the previous accepted one
    pub fn is_spike(&self) -> bool {
        self.is_spike
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ms  {:.2} {}",
            self.timestamp_ms,
            self.distance_display,
            self.unit.symbol()
        )?;
        if self.is_spike {
            write!(f, "  [spike]")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a serial link
///
/// Transitions are `Closed -> Opening -> Open -> Closing -> Closed`.
/// Reads and writes are only permitted in `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl LinkState {
    /// Whether I/O is permitted
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Closed => write!(f, "Closed"),
            LinkState::Opening => write!(f, "Opening"),
            LinkState::Open => write!(f, "Open"),
            LinkState::Closing => write!(f, "Closing"),
        }
    }
}

/// Statistics about the running acquisition session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionStats {
    /// Non-empty lines received from the device
    pub lines_read: u64,
    /// Samples accepted into the session buffer
    pub samples_accepted: u64,
    /// Lines rejected by the frame parser
    pub malformed_lines: u64,
    /// Accepted samples flagged as spikes
    pub spikes: u64,
    /// Reads that timed out without a complete line
    pub timeouts: u64,
    /// Live messages dropped because the consumer queue was full
    pub dropped_messages: u64,
    /// Accepted samples per second since the session started
    pub effective_sample_rate: f64,
}

impl AcquisitionStats {
    /// Fraction of received lines that parsed, as a percentage
    pub fn acceptance_rate(&self) -> f64 {
        if self.lines_read == 0 {
            100.0
        } else {
            (self.samples_accepted as f64 / self.lines_read as f64) * 100.0
        }
    }
}

/// A serial port discovered on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// OS name of the port (`COM5`, `/dev/ttyUSB0`)
    pub port_name: String,
    /// Human readable description
    pub display: String,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}
