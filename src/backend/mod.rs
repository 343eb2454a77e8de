//! Backend module for serial acquisition
//!
//! This module handles all device communication in a separate thread to keep
//! the presentation layer responsive. It uses crossbeam channels for
//! thread-safe communication with the frontend.
//!
//! # Architecture
//!
//! The backend runs in a separate thread from the UI, communicating via channels:
//!
//! - [`BackendCommand`] - Messages sent from UI to backend (start, stop, etc.)
//! - [`BackendMessage`] - Messages sent from backend to UI (samples, status, errors)
//! - [`MonitorClient`] - UI-side handle for sending commands and receiving messages
//! - [`MonitorBackend`] - Main backend entry point that runs the worker loop
//!
//! # Components
//!
//! - [`LinkHandle`] - Serial link state machine, one open handle per port
//! - [`frame_parser`] - Wire protocol decoding
//! - [`acquisition::run`] - The streaming loop of one session
//! - [`BackendWorker`] - Command loop owning the session thread
//! - [`SerialPortConnector`] / [`MockConnector`] - Real and simulated devices
//!
//! # Example
//!
//! ```ignore
//! use distance_monitor::backend::MonitorBackend;
//! use distance_monitor::config::AppConfig;
//!
//! let config = AppConfig::default();
//! let (backend, client) = MonitorBackend::new(&config);
//!
//! // Spawn backend thread
//! std::thread::spawn(move || backend.run());
//!
//! // Send commands from UI
//! client.start(config.link.clone(), config.acquisition.clone());
//!
//! // Receive messages
//! for msg in client.drain() {
//!     match msg {
//!         BackendMessage::Sample(sample) => {
//!             // Handle new data
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod acquisition;
pub mod frame_parser;
pub mod link;
pub mod mock_link;
pub mod serial;
pub mod transport;
pub mod worker;

pub use acquisition::{CancelToken, RunSummary, SampleSink};
pub use frame_parser::Frame;
pub use link::{ControlByte, LinkHandle, LinkStats, PortRegistry};
pub use mock_link::{MockConnector, MockGenerator, MockPattern, MOCK_PORT};
pub use serial::{list_ports, SerialPortConnector};
pub use transport::{Connector, SerialTransport};
pub use worker::BackendWorker;

use crate::config::{AcquisitionSettings, AppConfig, LinkConfig};
use crate::error::{MonitorError, Result};
use crate::session::SessionReader;
use crate::types::{AcquisitionStats, LinkState, PortInfo, Sample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Capacity of the command queue
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Message sent from the UI to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Open a port and start streaming, stopping any current session first
    Start {
        /// Connection parameters
        link: LinkConfig,
        /// Pacing, unit and spike settings
        acquisition: AcquisitionSettings,
    },
    /// Stop the current session
    Stop,
    /// Clear the buffer of the last finished session
    ClearData,
    /// Enable or disable spike flagging for subsequent sessions
    SetSpikeFlagging(bool),
    /// Request current statistics
    RequestStats,
    /// Request port list refresh
    RefreshPorts,
    /// Shutdown the backend
    Shutdown,
}

/// Message sent from the backend to the UI
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Link state changed
    LinkStatus(LinkState),
    /// The port could not be opened
    ConnectionError(String),
    /// Streaming started; `reader` observes the new session buffer
    SessionStarted { port: String, reader: SessionReader },
    /// New accepted sample
    Sample(Sample),
    /// A line from the device was rejected
    MalformedLine { line: String, reason: String },
    /// The session stopped after cancellation
    SessionEnded(RunSummary),
    /// The session stopped on a link failure
    SessionFailed(String),
    /// Statistics update
    Stats(AcquisitionStats),
    /// Port list update (response to RefreshPorts)
    PortList(Vec<PortInfo>),
    /// Backend is shutting down
    Shutdown,
}

/// Client handle for the backend
pub struct MonitorClient {
    /// Receiver for backend messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the backend
    pub command_sender: Sender<BackendCommand>,
}

impl MonitorClient {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BackendMessage> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    /// Send a command, failing if the backend has exited
    pub fn request(&self, cmd: BackendCommand) -> Result<()> {
        self.command_sender
            .send(cmd)
            .map_err(|e| MonitorError::Channel(format!("backend is not running: {:?}", e.0)))
    }

    /// Start streaming from a port
    pub fn start(&self, link: LinkConfig, acquisition: AcquisitionSettings) {
        let _ = self
            .command_sender
            .send(BackendCommand::Start { link, acquisition });
    }

    /// Stop streaming
    pub fn stop(&self) {
        let _ = self.command_sender.send(BackendCommand::Stop);
    }

    /// Clear collected data
    pub fn clear_data(&self) {
        let _ = self.command_sender.send(BackendCommand::ClearData);
    }

    /// Enable or disable spike flagging
    pub fn set_spike_flagging(&self, enabled: bool) {
        let _ = self
            .command_sender
            .send(BackendCommand::SetSpikeFlagging(enabled));
    }

    /// Request a statistics update
    pub fn request_stats(&self) {
        let _ = self.command_sender.send(BackendCommand::RequestStats);
    }

    /// Request a port list
    pub fn refresh_ports(&self) {
        let _ = self.command_sender.send(BackendCommand::RefreshPorts);
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(BackendCommand::Shutdown);
    }
}

/// The acquisition backend that runs in a separate thread
pub struct MonitorBackend {
    /// Receiver for commands from the UI
    command_receiver: Receiver<BackendCommand>,
    /// Sender for messages to the UI
    message_sender: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Opens device transports
    connector: Arc<dyn Connector>,
    /// Ports with an open handle
    registry: PortRegistry,
}

impl MonitorBackend {
    /// Create a backend for real serial ports
    pub fn new(config: &AppConfig) -> (Self, MonitorClient) {
        Self::with_connector(config, Arc::new(SerialPortConnector), PortRegistry::global().clone())
    }

    /// Create a backend with a custom connector and port registry
    pub fn with_connector(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        registry: PortRegistry,
    ) -> (Self, MonitorClient) {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        // Bounded for backpressure; live updates beyond this are dropped, not buffered
        let (msg_tx, msg_rx) = bounded(config.channel_capacity.max(1));

        let backend = Self {
            command_receiver: cmd_rx,
            message_sender: msg_tx,
            running: Arc::new(AtomicBool::new(true)),
            connector,
            registry,
        };

        let client = MonitorClient {
            receiver: msg_rx,
            command_sender: cmd_tx,
        };

        (backend, client)
    }

    /// Run the backend loop
    pub fn run(self) {
        let mut worker = BackendWorker::new(
            self.command_receiver,
            self.message_sender,
            self.running,
            self.connector,
            self.registry,
        );
        worker.run();
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
