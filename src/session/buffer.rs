//! Session buffer for accepted samples
//!
//! [`SessionBuffer`] is the only writer and is not `Clone`; the acquisition
//! loop owns it for the lifetime of a run. Any number of [`SessionReader`]s
//! may observe it concurrently. Because the buffer only ever grows (until an
//! explicit clear between runs), every read returns a prefix of the true
//! arrival order.

use crate::session::export::ExportRow;
use crate::types::Sample;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Writer side of the session buffer
#[derive(Debug, Default)]
pub struct SessionBuffer {
    samples: Arc<RwLock<Vec<Sample>>>,
}

impl SessionBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Arc::new(RwLock::new(Vec::with_capacity(capacity))),
        }
    }

    /// Append a sample at the end
    pub fn append(&mut self, sample: Sample) {
        self.write().push(sample);
    }

    /// Remove all samples
    pub fn clear(&mut self) {
        self.write().clear();
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.reader().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a read-only view
    pub fn reader(&self) -> SessionReader {
        SessionReader {
            samples: Arc::clone(&self.samples),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Sample>> {
        self.samples.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-only view of a session buffer
#[derive(Debug, Clone)]
pub struct SessionReader {
    samples: Arc<RwLock<Vec<Sample>>>,
}

impl SessionReader {
    /// Number of samples so far
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no samples have arrived
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every sample so far
    pub fn snapshot(&self) -> Vec<Sample> {
        self.read().clone()
    }

    /// Samples from `index` onwards
    ///
    /// Poll with the previous `len()` to fetch only new samples.
    pub fn since(&self, index: usize) -> Vec<Sample> {
        self.read().get(index..).map(<[Sample]>::to_vec).unwrap_or_default()
    }

    /// Most recent sample
    pub fn last(&self) -> Option<Sample> {
        self.read().last().copied()
    }

    /// Number of flagged samples
    pub fn spike_count(&self) -> usize {
        self.read().iter().filter(|s| s.is_spike()).count()
    }

    /// Table rows for export
    pub fn export_rows(&self, include_spike_notes: bool) -> Vec<ExportRow> {
        self.read()
            .iter()
            .map(|s| ExportRow::from_sample(s, include_spike_notes))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Sample>> {
        self.samples.read().unwrap_or_else(|e| e.into_inner())
    }
}
