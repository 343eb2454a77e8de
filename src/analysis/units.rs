//! Distance unit conversion
//!
//! The device always reports meters. Conversion to the display unit is a
//! linear scale. Rounding to two decimals happens only when a value is
//! displayed or exported; spike detection sees full precision.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Centimeters per meter
pub const CENTIMETERS_PER_METER: f64 = 100.0;

/// Inches per meter
pub const INCHES_PER_METER: f64 = 39.3701;

/// Display unit for distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Meters,
    Centimeters,
    Inches,
}

impl DistanceUnit {
    /// Get all units
    pub fn all() -> &'static [DistanceUnit] {
        &[
            DistanceUnit::Meters,
            DistanceUnit::Centimeters,
            DistanceUnit::Inches,
        ]
    }

    /// Scale factor from meters
    pub fn factor(&self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Centimeters => CENTIMETERS_PER_METER,
            DistanceUnit::Inches => INCHES_PER_METER,
        }
    }

    /// Convert a distance in meters to this unit
    pub fn convert(&self, distance_m: f64) -> f64 {
        match self {
            DistanceUnit::Meters => distance_m,
            unit => distance_m * unit.factor(),
        }
    }

    /// Convert a distance in this unit back to meters
    pub fn to_meters(&self, value: f64) -> f64 {
        match self {
            DistanceUnit::Meters => value,
            unit => value / unit.factor(),
        }
    }

    /// Short symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            DistanceUnit::Meters => "m",
            DistanceUnit::Centimeters => "cm",
            DistanceUnit::Inches => "in",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            DistanceUnit::Meters => "meters",
            DistanceUnit::Centimeters => "centimeters",
            DistanceUnit::Inches => "inches",
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DistanceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "meters" => Ok(DistanceUnit::Meters),
            "cm" | "centimeter" | "centimeters" => Ok(DistanceUnit::Centimeters),
            "in" | "inch" | "inches" => Ok(DistanceUnit::Inches),
            other => Err(format!(
                "unknown unit '{}', expected meters, centimeters or inches",
                other
            )),
        }
    }
}

/// Round a display value to two decimal places
pub fn round_display(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
