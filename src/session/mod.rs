//! Session buffer and export module
//!
//! This module holds the samples of one start-to-stop acquisition run and
//! turns them into an exportable table.
//!
//! # Features
//!
//! - Append-only, order-preserving buffer with a single writer
//! - Cheap read-only views for live charts and tables
//! - Incremental polling of new samples by index
//! - CSV export with `Timestamp (ms),Distance,Note` columns

pub mod buffer;
pub mod export;

pub use buffer::{SessionBuffer, SessionReader};
pub use export::{export_csv_file, write_csv, ExportRow, CSV_HEADER, SPIKE_NOTE};
