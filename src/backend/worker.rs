//! Backend Worker Thread Implementation
//!
//! This module contains the command loop that runs on the backend thread and
//! owns the lifecycle of acquisition sessions. It communicates with the
//! presentation layer through crossbeam channels.
//!
//! # Responsibilities
//!
//! - **Command processing**: start, stop, clear, port refresh, shutdown
//! - **Session ownership**: at most one acquisition thread at a time; a new
//!   start cancels and joins the previous one before its port is reopened
//! - **Live forwarding**: samples and malformed lines go out with `try_send`,
//!   so a slow consumer loses live updates, never buffered samples
//! - **Statistics**: sent every 500 ms while a session runs

use crate::backend::acquisition::{self, CancelToken, RunSummary, SampleSink};
use crate::backend::link::{LinkHandle, PortRegistry};
use crate::backend::transport::Connector;
use crate::backend::{BackendCommand, BackendMessage};
use crate::config::{AcquisitionSettings, LinkConfig};
use crate::error::ParseError;
use crate::session::{SessionBuffer, SessionReader};
use crate::types::{AcquisitionStats, LinkState, Sample};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Interval between statistics updates
const STATS_INTERVAL: Duration = Duration::from_millis(500);

/// How long the worker waits for a command before housekeeping
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a lifecycle message may wait for room in the queue
const LIFECYCLE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters shared between a session thread and the worker
#[derive(Debug, Default)]
struct SharedStats {
    stats: Mutex<AcquisitionStats>,
    dropped: AtomicU64,
}

impl SharedStats {
    fn lock(&self) -> MutexGuard<'_, AcquisitionStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, elapsed: Duration) -> AcquisitionStats {
        let mut stats = self.lock().clone();
        stats.dropped_messages = self.dropped.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            stats.effective_sample_rate = stats.samples_accepted as f64 / secs;
        }
        stats
    }
}

/// Sink forwarding live updates to the presentation layer
struct ChannelSink {
    message_tx: Sender<BackendMessage>,
    shared: Arc<SharedStats>,
}

impl ChannelSink {
    fn forward(&self, msg: BackendMessage) {
        match self.message_tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    tracing::warn!("Message queue full, {} live updates dropped", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl SampleSink for ChannelSink {
    fn emit(&mut self, sample: &Sample) {
        self.forward(BackendMessage::Sample(*sample));
    }

    fn report_malformed(&mut self, line: &str, error: &ParseError) {
        self.forward(BackendMessage::MalformedLine {
            line: line.to_string(),
            reason: error.reason().to_string(),
        });
    }

    fn progress(&mut self, summary: &RunSummary) {
        let mut stats = self.shared.lock();
        stats.lines_read = summary.lines_read;
        stats.samples_accepted = summary.samples_accepted;
        stats.malformed_lines = summary.malformed_lines;
        stats.spikes = summary.spikes;
        stats.timeouts = summary.timeouts;
    }
}

/// A running acquisition thread
struct ActiveSession {
    port: String,
    cancel: CancelToken,
    handle: JoinHandle<SessionBuffer>,
    shared: Arc<SharedStats>,
    started: Instant,
}

/// Send a message that must not be dropped, waiting briefly for room
fn send_lifecycle(tx: &Sender<BackendMessage>, msg: BackendMessage) {
    if let Err(e) = tx.send_timeout(msg, LIFECYCLE_SEND_TIMEOUT) {
        tracing::warn!("Could not deliver lifecycle message: {}", e);
    }
}

/// Everything a session thread needs
struct SessionThread {
    link_config: LinkConfig,
    settings: AcquisitionSettings,
    connector: Arc<dyn Connector>,
    registry: PortRegistry,
    message_tx: Sender<BackendMessage>,
    shared: Arc<SharedStats>,
    cancel: CancelToken,
}

impl SessionThread {
    /// Open, stream, report, and hand the buffer back
    fn run(self, mut buffer: SessionBuffer) -> SessionBuffer {
        let port = self.link_config.port.clone();
        let tx = &self.message_tx;
        send_lifecycle(tx, BackendMessage::LinkStatus(LinkState::Opening));

        let link = match LinkHandle::open(self.link_config, self.connector.as_ref(), &self.registry) {
            Ok(link) => link,
            Err(e) => {
                send_lifecycle(tx, BackendMessage::LinkStatus(LinkState::Closed));
                send_lifecycle(tx, BackendMessage::ConnectionError(e.to_string()));
                return buffer;
            }
        };

        send_lifecycle(tx, BackendMessage::LinkStatus(LinkState::Open));
        send_lifecycle(
            tx,
            BackendMessage::SessionStarted {
                port,
                reader: buffer.reader(),
            },
        );

        let mut sink = ChannelSink {
            message_tx: tx.clone(),
            shared: self.shared,
        };
        let outcome = acquisition::run(link, &self.settings, &mut buffer, &mut sink, &self.cancel);

        send_lifecycle(tx, BackendMessage::LinkStatus(LinkState::Closed));
        match outcome {
            Ok(summary) => send_lifecycle(tx, BackendMessage::SessionEnded(summary)),
            Err(e) => send_lifecycle(tx, BackendMessage::SessionFailed(e.to_string())),
        }
        buffer
    }
}

/// The backend worker that owns acquisition sessions
pub struct BackendWorker {
    /// Command receiver from the UI
    command_rx: Receiver<BackendCommand>,
    /// Message sender to the UI
    message_tx: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Opens device transports
    connector: Arc<dyn Connector>,
    /// Ports with an open handle
    registry: PortRegistry,
    /// Session currently streaming
    session: Option<ActiveSession>,
    /// Buffer of the last finished session
    last_buffer: Option<SessionBuffer>,
    /// Final statistics of the last finished session
    last_stats: AcquisitionStats,
    /// Spike flagging override from `SetSpikeFlagging`
    spike_flagging: Option<bool>,
    /// Last time stats were sent to UI
    last_stats_time: Instant,
}

impl BackendWorker {
    /// Create a new backend worker
    pub fn new(
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        running: Arc<AtomicBool>,
        connector: Arc<dyn Connector>,
        registry: PortRegistry,
    ) -> Self {
        Self {
            command_rx,
            message_tx,
            running,
            connector,
            registry,
            session: None,
            last_buffer: None,
            last_stats: AcquisitionStats::default(),
            spike_flagging: None,
            last_stats_time: Instant::now(),
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Backend worker started ({} connector)", self.connector.name());

        while self.running.load(Ordering::SeqCst) {
            match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
                Ok(cmd) => self.handle_command(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                }
            }

            self.reap_finished_session();

            if self.session.is_some() && self.last_stats_time.elapsed() >= STATS_INTERVAL {
                self.send_stats();
                self.last_stats_time = Instant::now();
            }
        }

        // Cleanup
        self.stop_session();

        let _ = self.message_tx.send_timeout(BackendMessage::Shutdown, LIFECYCLE_SEND_TIMEOUT);
        tracing::info!("Backend worker stopped");
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::Start { link, acquisition } => {
                self.start_session(link, acquisition);
            }
            BackendCommand::Stop => {
                self.stop_session();
            }
            BackendCommand::ClearData => {
                self.clear_data();
            }
            BackendCommand::SetSpikeFlagging(enabled) => {
                tracing::info!(
                    "Spike flagging {} for the next session",
                    if enabled { "enabled" } else { "disabled" }
                );
                self.spike_flagging = Some(enabled);
            }
            BackendCommand::RequestStats => {
                self.send_stats();
            }
            BackendCommand::RefreshPorts => {
                let ports = self.connector.available_ports();
                let _ = self.message_tx.try_send(BackendMessage::PortList(ports));
            }
            BackendCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Start a new session, stopping the current one first
    fn start_session(&mut self, link: LinkConfig, mut settings: AcquisitionSettings) {
        if self.session.is_some() {
            tracing::info!("Restarting acquisition, stopping the current session first");
            self.stop_session();
        }

        if let Some(enabled) = self.spike_flagging {
            settings.spike_flagging = enabled;
        }
        let settings = settings.validated();

        let port = link.port.clone();
        let cancel = CancelToken::new();
        let shared = Arc::new(SharedStats::default());
        let buffer = SessionBuffer::new();
        self.last_buffer = None;
        self.last_stats = AcquisitionStats::default();

        let thread = SessionThread {
            link_config: link,
            settings,
            connector: Arc::clone(&self.connector),
            registry: self.registry.clone(),
            message_tx: self.message_tx.clone(),
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("acquisition-{}", port))
            .spawn(move || thread.run(buffer));

        match handle {
            Ok(handle) => {
                self.session = Some(ActiveSession {
                    port,
                    cancel,
                    handle,
                    shared,
                    started: Instant::now(),
                });
                self.last_stats_time = Instant::now();
            }
            Err(e) => {
                tracing::error!("Failed to spawn acquisition thread: {}", e);
                send_lifecycle(
                    &self.message_tx,
                    BackendMessage::ConnectionError(format!("Failed to start session: {}", e)),
                );
            }
        }
    }

    /// Cancel the current session and wait for it to release the port
    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!("Stopping acquisition on {}", session.port);
            session.cancel.cancel();
            self.finish_session(session);
        }
    }

    /// Join a session thread that ended on its own
    fn reap_finished_session(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.handle.is_finished())
        {
            if let Some(session) = self.session.take() {
                self.finish_session(session);
            }
        }
    }

    fn finish_session(&mut self, session: ActiveSession) {
        let elapsed = session.started.elapsed();
        match session.handle.join() {
            Ok(buffer) => self.last_buffer = Some(buffer),
            Err(_) => tracing::error!("Acquisition thread for {} panicked", session.port),
        }
        self.last_stats = session.shared.snapshot(elapsed);
        self.send_stats();
    }

    /// Clear the buffer of the last finished session
    fn clear_data(&mut self) {
        if self.session.is_some() {
            tracing::warn!("Ignoring clear while a session is streaming");
            return;
        }
        if let Some(buffer) = self.last_buffer.as_mut() {
            buffer.clear();
        }
        self.last_stats = AcquisitionStats::default();
        tracing::info!("Session data cleared");
    }

    /// Send current statistics
    fn send_stats(&self) {
        let stats = match &self.session {
            Some(session) => session.shared.snapshot(session.started.elapsed()),
            None => self.last_stats.clone(),
        };
        let _ = self.message_tx.try_send(BackendMessage::Stats(stats));
    }

    /// Reader for the last finished session, if any
    pub fn last_session(&self) -> Option<SessionReader> {
        self.last_buffer.as_ref().map(SessionBuffer::reader)
    }
}
