//! Session export
//!
//! A session exports as a table of `{timestamp_ms, distance, note}` where the
//! distance is in the display unit rounded to two decimals and the note is
//! `Spike` for flagged samples (or empty when spike notes are disabled).

use crate::config::ExportSettings;
use crate::error::{MonitorError, Result, ResultExt};
use crate::session::buffer::SessionReader;
use crate::types::Sample;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// CSV header row
pub const CSV_HEADER: [&str; 3] = ["Timestamp (ms)", "Distance", "Note"];

/// Note written for flagged samples
pub const SPIKE_NOTE: &str = "Spike";

/// One row of the exported table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    /// Device timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Distance in the display unit, rounded to two decimals
    pub distance: f64,
    /// `Spike` or empty
    pub note: String,
}

impl ExportRow {
    /// Build a row from a sample
    pub fn from_sample(sample: &Sample, include_spike_notes: bool) -> Self {
        let note = if include_spike_notes && sample.is_spike() {
            SPIKE_NOTE.to_string()
        } else {
            String::new()
        };
        Self {
            timestamp_ms: sample.timestamp_ms(),
            distance: sample.distance_rounded(),
            note,
        }
    }
}

/// Write rows as CSV, header first
pub fn write_csv<W: Write>(rows: &[ExportRow], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;
    for row in rows {
        csv.write_record([
            row.timestamp_ms.to_string(),
            format!("{:.2}", row.distance),
            row.note.clone(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Render rows as a CSV string
pub fn to_csv_string(rows: &[ExportRow]) -> Result<String> {
    let mut out = Vec::new();
    write_csv(rows, &mut out)?;
    String::from_utf8(out).map_err(|e| MonitorError::Export(e.to_string()))
}

/// Export a session to `path`, returning the number of rows written
///
/// The file is written next to its destination and renamed into place, so
/// a reader never sees a half-written export.
pub fn export_csv_file(
    reader: &SessionReader,
    path: impl AsRef<Path>,
    settings: &ExportSettings,
) -> Result<usize> {
    let path = path.as_ref();
    let rows = reader.export_rows(settings.include_spike_notes);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("csv.tmp");
    let file = std::fs::File::create(&tmp)
        .map_err(MonitorError::from)
        .with_context(|| format!("Failed to create {:?}", tmp))?;
    let written = write_csv(&rows, std::io::BufWriter::new(file)).and_then(|()| {
        std::fs::rename(&tmp, path)
            .map_err(MonitorError::from)
            .with_context(|| format!("Failed to move export into {:?}", path))
    });
    if let Err(e) = written {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            tracing::warn!("Failed to remove {:?}: {}", tmp, cleanup);
        }
        return Err(e);
    }

    tracing::info!("Exported {} samples to {:?}", rows.len(), path);
    Ok(rows.len())
}
