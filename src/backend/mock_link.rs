//! Mock Device Implementation for Testing
//!
//! This module provides a simulated distance sensor that can be used to run
//! the whole acquisition pipeline without hardware. It behaves like the
//! firmware: nothing is sent until the host writes `s`, and output stops
//! when the host writes `x`.
//!
//! # Features
//!
//! - **Scripted bytes**: queue an exact byte stream (including garbage and
//!   partial lines) to exercise the parser
//! - **Pattern generation**: emit a synthetic distance signal for demos
//! - **Control byte log**: every byte the host writes is recorded
//! - **Handle accounting**: tracks how many transports are open at once
//! - **Fault injection**: failing opens, reads and writes
//!
//! # Example
//!
//! ```ignore
//! use distance_monitor::backend::MockConnector;
//!
//! let device = MockConnector::new().with_script(b"100,1.0\n200,1.2\n");
//! let link = LinkHandle::open(config, &device, &registry)?;
//! ```

use crate::backend::transport::{Connector, SerialTransport};
use crate::config::LinkConfig;
use crate::types::PortInfo;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Port name the mock device advertises
pub const MOCK_PORT: &str = "MOCK0";

/// Longest the mock blocks on an empty read
const MAX_IDLE_READ: Duration = Duration::from_millis(20);

/// Pattern for generating mock distances (meters)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockPattern {
    /// Constant distance
    Constant(f64),
    /// Sine wave around `offset`
    Sine {
        period_ms: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Linear ramp from `min` to `max` that resets every period
    Sawtooth { period_ms: f64, min: f64, max: f64 },
}

impl Default for MockPattern {
    fn default() -> Self {
        MockPattern::Sine {
            period_ms: 5000.0,
            amplitude: 0.5,
            offset: 1.0,
        }
    }
}

impl MockPattern {
    /// Distance at `elapsed_ms` into the stream
    pub fn value_at(&self, elapsed_ms: f64) -> f64 {
        match *self {
            MockPattern::Constant(v) => v,
            MockPattern::Sine {
                period_ms,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * elapsed_ms / period_ms).sin(),
            MockPattern::Sawtooth { period_ms, min, max } => {
                let t = elapsed_ms % period_ms;
                min + (max - min) * (t / period_ms)
            }
        }
    }
}

/// Generator settings for the pattern mode
#[derive(Debug, Clone)]
pub struct MockGenerator {
    /// Signal shape
    pub pattern: MockPattern,
    /// Time between emitted lines
    pub interval: Duration,
    /// Noise amplitude in meters (0.0 = none)
    pub noise: f64,
    /// Emit a large jump every N lines
    pub spike_every: Option<u64>,
    /// Emit an unparseable line every N lines
    pub garbage_every: Option<u64>,
    lines_emitted: u64,
    started: Option<Instant>,
    next_due: Option<Instant>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new(MockPattern::default(), Duration::from_millis(50))
    }
}

impl MockGenerator {
    /// Create a generator emitting one line per `interval`
    pub fn new(pattern: MockPattern, interval: Duration) -> Self {
        Self {
            pattern,
            interval,
            noise: 0.0,
            spike_every: None,
            garbage_every: None,
            lines_emitted: 0,
            started: None,
            next_due: None,
        }
    }

    /// Add noise to the generated values
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// Inject a spike every `n` lines
    pub fn with_spikes(mut self, n: u64) -> Self {
        self.spike_every = Some(n.max(1));
        self
    }

    /// Inject a malformed line every `n` lines
    pub fn with_garbage(mut self, n: u64) -> Self {
        self.garbage_every = Some(n.max(1));
        self
    }

    fn restart(&mut self) {
        let now = Instant::now();
        self.started = Some(now);
        self.next_due = Some(now);
    }

    fn stop(&mut self) {
        self.started = None;
        self.next_due = None;
    }

    /// Produce the next line if one is due, otherwise how long until it is
    fn poll(&mut self) -> Result<String, Duration> {
        let (Some(started), Some(due)) = (self.started, self.next_due) else {
            return Err(MAX_IDLE_READ);
        };
        let now = Instant::now();
        if now < due {
            return Err(due - now);
        }
        self.next_due = Some(due + self.interval);
        self.lines_emitted += 1;
        let n = self.lines_emitted;

        if self.garbage_every.is_some_and(|every| n % every == 0) {
            return Ok("ERR sensor timeout\n".to_string());
        }

        let elapsed_ms = now.duration_since(started).as_secs_f64() * 1000.0;
        let mut distance = self.pattern.value_at(elapsed_ms);
        if self.noise > 0.0 {
            distance += (rand_simple() - 0.5) * 2.0 * self.noise;
        }
        if self.spike_every.is_some_and(|every| n % every == 0) {
            distance += 25.0;
        }
        Ok(format!("{},{:.4}\n", elapsed_ms as u64, distance))
    }
}

/// Simple pseudo-random number generator (no external dependency)
fn rand_simple() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = const { Cell::new(12345) };
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

/// Shared device state behind all transports opened by one connector
#[derive(Debug, Default)]
struct MockDevice {
    script: VecDeque<u8>,
    generator: Option<MockGenerator>,
    streaming: bool,
    control_log: Vec<u8>,
    chunk_size: usize,
    open_error: Option<io::ErrorKind>,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    connects: usize,
}

/// Connector for the simulated sensor
///
/// Clones share one device, so a test can keep a clone to inspect the
/// control log and handle counts while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: Arc<Mutex<MockDevice>>,
    open_handles: Arc<AtomicUsize>,
    max_open_handles: Arc<AtomicUsize>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Create a silent device
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(MockDevice {
                chunk_size: 64,
                ..MockDevice::default()
            })),
            open_handles: Arc::new(AtomicUsize::new(0)),
            max_open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue bytes to deliver once streaming starts
    pub fn with_script(self, bytes: &[u8]) -> Self {
        self.push_bytes(bytes);
        self
    }

    /// Generate a synthetic signal while streaming
    pub fn with_generator(self, generator: MockGenerator) -> Self {
        self.device().generator = Some(generator);
        self
    }

    /// Deliver at most `size` bytes per read, to split lines across reads
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.device().chunk_size = size.max(1);
        self
    }

    /// Make every open fail with `kind`
    pub fn fail_open(&self, kind: Option<io::ErrorKind>) {
        self.device().open_error = kind;
    }

    /// Make the next read fail with `kind`
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.device().read_error = Some(kind);
    }

    /// Make writes fail with `kind`
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.device().write_error = kind;
    }

    /// Queue more bytes
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.device().script.extend(bytes.iter().copied());
    }

    /// Every byte written by the host, in order
    pub fn control_log(&self) -> Vec<u8> {
        self.device().control_log.clone()
    }

    /// Whether the device is currently streaming
    pub fn is_streaming(&self) -> bool {
        self.device().streaming
    }

    /// Bytes still queued for delivery
    pub fn pending_bytes(&self) -> usize {
        self.device().script.len()
    }

    /// Number of successful opens
    pub fn connects(&self) -> usize {
        self.device().connects
    }

    /// Transports currently open
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Largest number of transports that were ever open at the same time
    pub fn max_open_handles(&self) -> usize {
        self.max_open_handles.load(Ordering::SeqCst)
    }

    fn device(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &LinkConfig) -> io::Result<Box<dyn SerialTransport>> {
        {
            let mut device = self.device();
            if let Some(kind) = device.open_error {
                return Err(io::Error::new(kind, format!("mock port {} refused", config.port)));
            }
            // Opening resets the microcontroller
            device.streaming = false;
            device.connects += 1;
        }

        let now_open = self.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_handles.fetch_max(now_open, Ordering::SeqCst);

        Ok(Box::new(MockTransport {
            device: Arc::clone(&self.device),
            open_handles: Arc::clone(&self.open_handles),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn available_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo {
            port_name: MOCK_PORT.to_string(),
            display: format!("{} - Simulated distance sensor", MOCK_PORT),
        }]
    }
}

/// Transport to the simulated sensor
pub struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
    open_handles: Arc<AtomicUsize>,
    read_timeout: Duration,
}

impl MockTransport {
    fn device(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SerialTransport for MockTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let wait = {
            let mut device = self.device();
            if let Some(kind) = device.read_error.take() {
                return Err(io::Error::new(kind, "mock read failure"));
            }

            if device.streaming {
                let limit = buf.len().min(device.chunk_size);
                if !device.script.is_empty() {
                    let n = limit.min(device.script.len());
                    for (slot, byte) in buf.iter_mut().zip(device.script.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if let Some(generator) = device.generator.as_mut() {
                    match generator.poll() {
                        Ok(line) => {
                            let bytes = line.as_bytes();
                            let n = bytes.len().min(limit);
                            buf[..n].copy_from_slice(&bytes[..n]);
                            device.script.extend(bytes[n..].iter().copied());
                            return Ok(n);
                        }
                        Err(until_due) => until_due,
                    }
                } else {
                    MAX_IDLE_READ
                }
            } else {
                MAX_IDLE_READ
            }
        };

        std::thread::sleep(wait.min(self.read_timeout).min(MAX_IDLE_READ));
        Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"))
    }

    fn write_all_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut device = self.device();
        if let Some(kind) = device.write_error {
            return Err(io::Error::new(kind, "mock write failure"));
        }
        for &byte in bytes {
            device.control_log.push(byte);
            match byte {
                b's' => {
                    device.streaming = true;
                    if let Some(generator) = device.generator.as_mut() {
                        generator.restart();
                    }
                }
                b'x' => {
                    device.streaming = false;
                    if let Some(generator) = device.generator.as_mut() {
                        generator.stop();
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
