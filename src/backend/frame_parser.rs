//! Frame parser for the device wire protocol
//!
//! One sample per newline-terminated line:
//!
//! ```text
//! <timestamp_ms:uint>,<distance_m:float>[,<ignored fields>...]
//! ```
//!
//! Only the first two fields are consumed, so firmware may append diagnostic
//! fields. No range check is made on the distance: zero and negative values
//! are structurally valid and flow through as data.

use crate::error::ParseError;

/// Field separator on the wire
pub const FIELD_SEPARATOR: char = ',';

/// A successfully parsed line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Device timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Distance in meters
    pub distance_m: f64,
}

/// Parse one line from the device
///
/// Surrounding whitespace (including a trailing `\r`) is ignored, as is
/// whitespace around each field.
pub fn parse(line: &str) -> Result<Frame, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::malformed(line, "empty line"));
    }

    let mut fields = trimmed.split(FIELD_SEPARATOR);
    let (Some(ts_field), Some(dist_field)) = (fields.next(), fields.next()) else {
        return Err(ParseError::malformed(
            line,
            "expected at least two comma-separated fields",
        ));
    };

    let ts_field = ts_field.trim();
    let timestamp_ms = ts_field.parse::<u64>().map_err(|_| {
        ParseError::malformed(line, format!("timestamp {:?} is not an integer", ts_field))
    })?;

    let dist_field = dist_field.trim();
    let distance_m = dist_field
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .ok_or_else(|| {
            ParseError::malformed(line, format!("distance {:?} is not a number", dist_field))
        })?;

    Ok(Frame {
        timestamp_ms,
        distance_m,
    })
}
