//! Acquisition loop
//!
//! [`run`] turns an open [`LinkHandle`] into a stream of [`Sample`]s:
//!
//! 1. Send the start byte `s`
//! 2. Read a line, bounded by the link's read timeout
//! 3. Parse, convert to the display unit, spike-check against the last
//!    accepted sample
//! 4. Append to the [`SessionBuffer`], emit to the [`SampleSink`]
//! 5. Sleep the remainder of the sample interval
//!
//! A timeout goes straight back to step 2 with no pacing delay. A malformed
//! line is counted, reported and skipped; it never ends the run and never
//! becomes the spike baseline. A hard link error ends the run.
//!
//! The cancel token is checked before every read, so cancellation is
//! observed within one read timeout. The stop byte `x` is sent and the link
//! closed on every exit path, including errors and panics.

use crate::analysis::SpikeDetector;
use crate::backend::frame_parser;
use crate::backend::link::{ControlByte, LinkHandle};
use crate::config::AcquisitionSettings;
use crate::error::{LinkError, ParseError};
use crate::session::SessionBuffer;
use crate::types::Sample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting on a cancellable delay
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cooperative cancellation signal shared between a session and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
        }
    }
}

/// Live consumer of an acquisition run
///
/// Implementations must not block; the loop calls them between reads.
pub trait SampleSink {
    /// An accepted sample, already appended to the session buffer
    fn emit(&mut self, sample: &Sample);

    /// A line the parser rejected
    fn report_malformed(&mut self, _line: &str, _error: &ParseError) {}

    /// Counters after every iteration
    fn progress(&mut self, _summary: &RunSummary) {}
}

impl SampleSink for Vec<Sample> {
    fn emit(&mut self, sample: &Sample) {
        self.push(*sample);
    }
}

/// Counters for one acquisition run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Port the run read from
    pub port: String,
    /// Wall clock time the run started
    pub started_at: DateTime<Utc>,
    /// Time from start byte to stop byte
    pub duration: Duration,
    /// Non-empty lines received
    pub lines_read: u64,
    /// Samples appended to the session buffer
    pub samples_accepted: u64,
    /// Lines rejected by the parser
    pub malformed_lines: u64,
    /// Accepted samples flagged as spikes
    pub spikes: u64,
    /// Reads that returned no line
    pub timeouts: u64,
}

impl RunSummary {
    fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            lines_read: 0,
            samples_accepted: 0,
            malformed_lines: 0,
            spikes: 0,
            timeouts: 0,
        }
    }

    /// Accepted samples per second of run time
    pub fn effective_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.samples_accepted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Link in streaming mode
///
/// Dropping it sends the stop byte (best effort) and closes the link.
struct Streaming {
    link: LinkHandle,
}

impl Streaming {
    fn start(link: LinkHandle) -> Result<Self, LinkError> {
        let mut streaming = Self { link };
        streaming.link.send_control(ControlByte::Start)?;
        Ok(streaming)
    }
}

impl Drop for Streaming {
    fn drop(&mut self) {
        if self.link.is_open() {
            if let Err(e) = self.link.send_control(ControlByte::Stop) {
                tracing::warn!("Failed to send stop byte to {}: {}", self.link.port(), e);
            }
        }
        self.link.close();
    }
}

/// Run one acquisition session until `cancel` fires or the link fails
///
/// The link is consumed and is closed when this returns.
pub fn run<S: SampleSink + ?Sized>(
    link: LinkHandle,
    settings: &AcquisitionSettings,
    buffer: &mut SessionBuffer,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<RunSummary, LinkError> {
    let settings = settings.validated();
    let interval = settings.sample_interval();
    let read_timeout = link.config().read_timeout();
    let mut summary = RunSummary::new(link.port());
    let started = Instant::now();

    tracing::info!(
        "Starting acquisition on {} ({} ms, {})",
        summary.port,
        settings.sample_rate_ms,
        settings.unit
    );

    let mut stream = Streaming::start(link)?;
    let mut detector = SpikeDetector::new(settings.spike_threshold);

    while !cancel.is_cancelled() {
        let iteration = Instant::now();

        let line = match stream.link.read_line(read_timeout) {
            Ok(Some(line)) => line,
            Ok(None) => {
                summary.timeouts += 1;
                sink.progress(&summary);
                continue;
            }
            Err(e) => {
                tracing::error!("Acquisition on {} failed: {}", summary.port, e);
                return Err(e);
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        summary.lines_read += 1;

        let frame = match frame_parser::parse(&line) {
            Ok(frame) => frame,
            Err(e) => {
                summary.malformed_lines += 1;
                tracing::warn!("Skipping line from {}: {}", summary.port, e);
                sink.report_malformed(&line, &e);
                sink.progress(&summary);
                continue;
            }
        };

        let display = settings.unit.convert(frame.distance_m);
        let is_spike = settings.spike_flagging && detector.check(display);
        let sample = Sample::new(frame.timestamp_ms, frame.distance_m, settings.unit, is_spike);
        detector.accept(sample);
        tracing::debug!("{}", sample);

        buffer.append(sample);
        summary.samples_accepted += 1;
        if is_spike {
            summary.spikes += 1;
        }
        sink.emit(&sample);
        sink.progress(&summary);

        if let Some(remaining) = interval.checked_sub(iteration.elapsed()) {
            cancel.sleep(remaining);
        }
    }

    drop(stream);
    summary.duration = started.elapsed();
    tracing::info!(
        "Acquisition on {} stopped: {} samples, {} malformed, {} spikes",
        summary.port,
        summary.samples_accepted,
        summary.malformed_lines,
        summary.spikes
    );
    Ok(summary)
}
