//! Serial link lifecycle
//!
//! [`LinkHandle`] owns one connection to the sensor and enforces the state
//! machine `Closed -> Opening -> Open -> Closing -> Closed`. It is the only
//! component that touches the device.
//!
//! # Guarantees
//!
//! - Reads and writes fail with [`LinkError::NotOpen`] outside `Open`
//! - At most one open handle per port per [`PortRegistry`]; a second `open`
//!   on a held port fails with [`LinkError::PortUnavailable`]
//! - `close` is idempotent and infallible, and runs on drop, so the OS handle
//!   is released on every exit path
//! - `open` blocks for the settle delay before reporting `Open`; the device
//!   resets on connection and discards bytes sent meanwhile
//!
//! # Line Framing
//!
//! Bytes are buffered until a `\n` arrives. A trailing `\r` is stripped and
//! invalid UTF-8 is replaced, so garbage still reaches the parser (and is
//! rejected there) instead of desynchronising the stream. A run of more than
//! [`MAX_LINE_LEN`] bytes without a newline is flushed as one line.

use crate::backend::transport::{Connector, SerialTransport};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::types::LinkState;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

/// Longest line kept in the framing buffer
pub const MAX_LINE_LEN: usize = 1024;

/// Size of a single transport read
const READ_CHUNK_SIZE: usize = 256;

/// Pause after an empty read before asking the transport again
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

/// Host to device control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    /// `s`: begin streaming
    Start,
    /// `x`: end streaming
    Stop,
}

impl ControlByte {
    /// Wire value
    pub fn as_byte(&self) -> u8 {
        match self {
            ControlByte::Start => b's',
            ControlByte::Stop => b'x',
        }
    }
}

impl fmt::Display for ControlByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_byte() as char)
    }
}

// ==================== Port Registry ====================

/// Tracks which ports currently have an open handle
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    open: Arc<Mutex<HashSet<String>>>,
}

impl PortRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static PortRegistry {
        static GLOBAL: OnceLock<PortRegistry> = OnceLock::new();
        GLOBAL.get_or_init(PortRegistry::new)
    }

    /// Whether `port` has an open handle
    pub fn is_open(&self, port: &str) -> bool {
        self.ports().contains(port)
    }

    /// Ports with an open handle, sorted
    pub fn open_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.ports().iter().cloned().collect();
        ports.sort();
        ports
    }

    fn claim(&self, port: &str) -> Option<PortClaim> {
        if self.ports().insert(port.to_string()) {
            Some(PortClaim {
                port: port.to_string(),
                registry: self.clone(),
            })
        } else {
            None
        }
    }

    fn ports(&self) -> MutexGuard<'_, HashSet<String>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive claim on a port, released on drop
#[derive(Debug)]
struct PortClaim {
    port: String,
    registry: PortRegistry,
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        self.registry.ports().remove(&self.port);
    }
}

// ==================== Link Statistics ====================

/// Counters for one link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Complete lines returned
    pub lines_read: u64,
    /// Raw bytes received
    pub bytes_read: u64,
    /// `read_line` calls that ended without a line
    pub timeouts: u64,
    /// Lines flushed for exceeding [`MAX_LINE_LEN`]
    pub overlong_lines: u64,
}

// ==================== Link Handle ====================

/// An owned connection to the sensor
pub struct LinkHandle {
    config: LinkConfig,
    state: LinkState,
    transport: Option<Box<dyn SerialTransport>>,
    claim: Option<PortClaim>,
    pending: Vec<u8>,
    stats: LinkStats,
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("pending_bytes", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl LinkHandle {
    /// Open, configure and settle a connection
    ///
    /// Fails with [`LinkError::PortUnavailable`] if the port is already held
    /// in `registry` or the connector cannot open it. On success the call has
    /// blocked for `config.settle_delay_ms`.
    pub fn open(
        config: LinkConfig,
        connector: &dyn Connector,
        registry: &PortRegistry,
    ) -> Result<Self, LinkError> {
        let mut link = Self {
            config,
            state: LinkState::Closed,
            transport: None,
            claim: None,
            pending: Vec::with_capacity(READ_CHUNK_SIZE),
            stats: LinkStats::default(),
        };
        link.connect(connector, registry)?;
        Ok(link)
    }

    /// Close the current connection and open a fresh one with the same config
    ///
    /// The old OS handle is released before the new one is acquired.
    pub fn reopen(
        &mut self,
        connector: &dyn Connector,
        registry: &PortRegistry,
    ) -> Result<(), LinkError> {
        self.close();
        self.stats = LinkStats::default();
        self.connect(connector, registry)
    }

    fn connect(
        &mut self,
        connector: &dyn Connector,
        registry: &PortRegistry,
    ) -> Result<(), LinkError> {
        debug_assert_eq!(self.state, LinkState::Closed);
        let port = self.config.port.clone();
        self.state = LinkState::Opening;
        tracing::info!(
            "Opening {} link on {} at {} baud",
            connector.name(),
            port,
            self.config.baud_rate
        );

        let Some(claim) = registry.claim(&port) else {
            self.state = LinkState::Closed;
            tracing::warn!("Port {} already has an open handle", port);
            return Err(LinkError::PortUnavailable {
                port,
                source: io::Error::other("port already open in this process"),
            });
        };

        let transport = match connector.connect(&self.config) {
            Ok(transport) => transport,
            Err(source) => {
                self.state = LinkState::Closed;
                tracing::error!("Failed to open {}: {}", port, source);
                return Err(LinkError::PortUnavailable { port, source });
            }
        };

        self.claim = Some(claim);
        self.transport = Some(transport);

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tracing::debug!("Waiting {:?} for {} to settle", settle, port);
            std::thread::sleep(settle);
        }

        self.state = LinkState::Open;
        tracing::info!("Link on {} is open", port);
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether I/O is permitted
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Port name
    pub fn port(&self) -> &str {
        &self.config.port
    }

    /// Configuration this link was opened with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Link counters
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Write one control byte
    pub fn send_control(&mut self, byte: ControlByte) -> Result<(), LinkError> {
        let port = self.config.port.clone();
        let transport = self.open_transport()?;
        transport
            .write_all_bytes(&[byte.as_byte()])
            .map_err(|source| LinkError::WriteFailed { port, source })?;
        tracing::debug!("Sent control byte {} to {}", byte, self.config.port);
        Ok(())
    }

    /// Read one line, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no complete line arrived in time. Bytes of a
    /// partial line are kept for the next call.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        self.open_transport()?;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(line) = self.take_line() {
                self.stats.lines_read += 1;
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                self.stats.timeouts += 1;
                return Ok(None);
            }

            let port = &self.config.port;
            let Some(transport) = self.transport.as_mut() else {
                return Err(LinkError::NotOpen {
                    port: port.clone(),
                    state: self.state,
                });
            };

            match transport.read_chunk(&mut buf) {
                // EOF on a hung-up port; wait out the deadline like a timeout
                Ok(0) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(remaining.min(EMPTY_READ_BACKOFF));
                }
                Ok(n) => {
                    self.stats.bytes_read += n as u64;
                    self.pending.extend_from_slice(&buf[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(source) => {
                    tracing::error!("Read from {} failed: {}", port, source);
                    return Err(LinkError::ReadFailed {
                        port: port.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Release the connection
    ///
    /// Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closing;
        self.transport = None;
        self.claim = None;
        self.pending.clear();
        self.state = LinkState::Closed;
        tracing::info!("Link on {} closed", self.config.port);
    }

    fn open_transport(&mut self) -> Result<&mut Box<dyn SerialTransport>, LinkError> {
        match (self.state, self.transport.as_mut()) {
            (LinkState::Open, Some(transport)) => Ok(transport),
            (state, _) => Err(LinkError::NotOpen {
                port: self.config.port.clone(),
                state,
            }),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let raw: Vec<u8> = match self.pending.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
                line.pop();
                line
            }
            None if self.pending.len() > MAX_LINE_LEN => {
                self.stats.overlong_lines += 1;
                tracing::warn!(
                    "Flushing {} bytes without a line terminator from {} as one line",
                    self.pending.len(),
                    self.config.port
                );
                std::mem::take(&mut self.pending)
            }
            None => return None,
        };

        let mut line = String::from_utf8_lossy(&raw).into_owned();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_link::MockConnector;
    use crate::backend::transport::MockSerialTransport;

    fn config(port: &str) -> LinkConfig {
        LinkConfig {
            port: port.to_string(),
            read_timeout_ms: 10,
            settle_delay_ms: 0,
            ..LinkConfig::default()
        }
    }

    /// Connector handing out one pre-built transport
    struct OneShot(Mutex<Option<MockSerialTransport>>);

    impl Connector for OneShot {
        fn connect(&self, _config: &LinkConfig) -> io::Result<Box<dyn SerialTransport>> {
            self.0
                .lock()
                .unwrap()
                .take()
                .map(|t| Box::new(t) as Box<dyn SerialTransport>)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no transport"))
        }

        fn name(&self) -> &'static str {
            "one-shot"
        }
    }

    fn open_started(device: &MockConnector, registry: &PortRegistry) -> LinkHandle {
        let mut link = LinkHandle::open(config("MOCK0"), device, registry).unwrap();
        link.send_control(ControlByte::Start).unwrap();
        link
    }

    #[test]
    fn test_open_and_close_lifecycle() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let mut link = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap();

        assert_eq!(link.state(), LinkState::Open);
        assert!(registry.is_open("MOCK0"));
        assert_eq!(device.open_handles(), 1);

        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert!(!registry.is_open("MOCK0"));
        assert_eq!(device.open_handles(), 0);

        // Idempotent
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_open_failure_is_port_unavailable() {
        let device = MockConnector::new();
        device.fail_open(Some(io::ErrorKind::PermissionDenied));
        let registry = PortRegistry::new();

        let err = LinkHandle::open(config("COM5"), &device, &registry).unwrap_err();
        assert!(matches!(err, LinkError::PortUnavailable { ref port, .. } if port == "COM5"));
        assert!(!registry.is_open("COM5"));
    }

    #[test]
    fn test_second_open_on_same_port_is_refused() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let _first = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap();

        let err = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap_err();
        assert!(matches!(err, LinkError::PortUnavailable { .. }));
        assert_eq!(device.max_open_handles(), 1);

        // A different port is fine
        let _other = LinkHandle::open(config("MOCK1"), &device, &registry).unwrap();
        assert_eq!(registry.open_ports(), vec!["MOCK0", "MOCK1"]);
    }

    #[test]
    fn test_drop_releases_port() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        {
            let _link = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap();
        }
        assert!(!registry.is_open("MOCK0"));
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_reopen_releases_old_handle_first() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let mut link = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap();

        link.reopen(&device, &registry).unwrap();
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(device.connects(), 2);
        assert_eq!(device.max_open_handles(), 1);
    }

    #[test]
    fn test_io_requires_open() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let mut link = LinkHandle::open(config("MOCK0"), &device, &registry).unwrap();
        link.close();

        assert!(matches!(
            link.send_control(ControlByte::Start),
            Err(LinkError::NotOpen {
                state: LinkState::Closed,
                ..
            })
        ));
        assert!(matches!(
            link.read_line(Duration::from_millis(1)),
            Err(LinkError::NotOpen { .. })
        ));
    }

    #[test]
    fn test_control_bytes_reach_device() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let mut link = open_started(&device, &registry);
        link.send_control(ControlByte::Stop).unwrap();
        assert_eq!(device.control_log(), b"sx".to_vec());
    }

    #[test]
    fn test_read_line_reassembles_chunks() {
        let device = MockConnector::new()
            .with_script(b"100,1.0\r\n200,1.2\n")
            .with_chunk_size(3);
        let registry = PortRegistry::new();
        let mut link = open_started(&device, &registry);

        let timeout = Duration::from_millis(200);
        assert_eq!(link.read_line(timeout).unwrap().as_deref(), Some("100,1.0"));
        assert_eq!(link.read_line(timeout).unwrap().as_deref(), Some("200,1.2"));
        assert_eq!(link.read_line(Duration::from_millis(5)).unwrap(), None);
        assert_eq!(link.stats().lines_read, 2);
        assert_eq!(link.stats().timeouts, 1);
    }

    #[test]
    fn test_read_line_timeout_keeps_partial_line() {
        let device = MockConnector::new().with_script(b"300,1.");
        let registry = PortRegistry::new();
        let mut link = open_started(&device, &registry);

        assert_eq!(link.read_line(Duration::from_millis(5)).unwrap(), None);
        device.push_bytes(b"25\n");
        assert_eq!(
            link.read_line(Duration::from_millis(200)).unwrap().as_deref(),
            Some("300,1.25")
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_fatal() {
        let device = MockConnector::new().with_script(b"\xff\xfe,1\n10,0.5\n");
        let registry = PortRegistry::new();
        let mut link = open_started(&device, &registry);

        let timeout = Duration::from_millis(200);
        let garbage = link.read_line(timeout).unwrap().unwrap();
        assert!(garbage.contains('\u{FFFD}'));
        assert_eq!(link.read_line(timeout).unwrap().as_deref(), Some("10,0.5"));
    }

    #[test]
    fn test_overlong_line_is_flushed() {
        let noise = vec![b'7'; MAX_LINE_LEN + 10];
        let device = MockConnector::new().with_script(&noise).with_chunk_size(256);
        let registry = PortRegistry::new();
        let mut link = open_started(&device, &registry);

        let line = link.read_line(Duration::from_millis(500)).unwrap().unwrap();
        assert!(line.len() > MAX_LINE_LEN);
        assert_eq!(link.stats().overlong_lines, 1);
    }

    #[test]
    fn test_read_error_is_read_failed() {
        let mut transport = MockSerialTransport::new();
        transport
            .expect_read_chunk()
            .returning(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let connector = OneShot(Mutex::new(Some(transport)));
        let registry = PortRegistry::new();

        let mut link = LinkHandle::open(config("COM5"), &connector, &registry).unwrap();
        let err = link.read_line(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, LinkError::ReadFailed { ref port, .. } if port == "COM5"));
    }

    #[test]
    fn test_write_error_is_write_failed() {
        let mut transport = MockSerialTransport::new();
        transport
            .expect_write_all_bytes()
            .withf(|bytes| bytes.to_vec() == b"s".to_vec())
            .times(1)
            .returning(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let connector = OneShot(Mutex::new(Some(transport)));
        let registry = PortRegistry::new();

        let mut link = LinkHandle::open(config("COM5"), &connector, &registry).unwrap();
        assert!(matches!(
            link.send_control(ControlByte::Start),
            Err(LinkError::WriteFailed { .. })
        ));
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        let mut transport = MockSerialTransport::new();
        transport
            .expect_read_chunk()
            .returning(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "quiet")));
        let connector = OneShot(Mutex::new(Some(transport)));
        let registry = PortRegistry::new();

        let mut link = LinkHandle::open(config("COM5"), &connector, &registry).unwrap();
        assert_eq!(link.read_line(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_empty_reads_wait_for_deadline() {
        let mut transport = MockSerialTransport::new();
        transport.expect_read_chunk().returning(|_| Ok(0));
        let connector = OneShot(Mutex::new(Some(transport)));
        let registry = PortRegistry::new();

        let mut link = LinkHandle::open(config("COM5"), &connector, &registry).unwrap();
        let start = Instant::now();
        assert_eq!(link.read_line(Duration::from_millis(40)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(link.stats().timeouts, 1);
    }

    #[test]
    fn test_settle_delay_blocks_open() {
        let device = MockConnector::new();
        let registry = PortRegistry::new();
        let mut cfg = config("MOCK0");
        cfg.settle_delay_ms = 30;

        let start = Instant::now();
        let _link = LinkHandle::open(cfg, &device, &registry).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_control_byte_values() {
        assert_eq!(ControlByte::Start.as_byte(), b's');
        assert_eq!(ControlByte::Stop.as_byte(), b'x');
        assert_eq!(ControlByte::Stop.to_string(), "'x'");
    }
}
