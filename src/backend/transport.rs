//! Transport trait for the device connection
//!
//! This module provides the seam between the link state machine and the
//! thing that actually moves bytes, so the same [`crate::backend::LinkHandle`]
//! drives both a real serial port and the scripted mock device.
//!
//! A transport's `read_chunk` follows serial port semantics: it blocks for at
//! most the configured read timeout and reports an empty line as
//! `ErrorKind::TimedOut`.

use crate::config::LinkConfig;
use crate::types::PortInfo;
use std::io;

/// Byte-level connection to a device
///
/// Implementations must be `Send` so a link can move onto the acquisition
/// thread. Dropping a transport releases the OS handle.
#[cfg_attr(test, mockall::automock)]
pub trait SerialTransport: Send {
    /// Read whatever bytes are available into `buf`
    ///
    /// Returns `Err` with `ErrorKind::TimedOut` when nothing arrived within
    /// the read timeout.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `bytes` and flush
    fn write_all_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Opens transports for a link configuration
pub trait Connector: Send + Sync {
    /// Open a transport to `config.port`
    fn connect(&self, config: &LinkConfig) -> io::Result<Box<dyn SerialTransport>>;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Ports this connector can open
    fn available_ports(&self) -> Vec<PortInfo> {
        Vec::new()
    }
}
