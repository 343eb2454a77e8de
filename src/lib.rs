//! # Distance Monitor: serial distance-sensor acquisition
//!
//! Streams `<timestamp_ms>,<distance_m>` lines from a microcontroller over a
//! serial port, converts them into a display unit, flags sudden jumps and
//! records the session for CSV export. The acquisition loop runs on its own
//! thread and talks to the presentation layer through bounded channels.
//!
//! ## Architecture
//!
//! - **Backend**: serial link state machine, frame parser and the cancellable
//!   acquisition loop, driven by a worker thread
//! - **Analysis**: unit conversion and spike detection
//! - **Session**: append-only sample buffer with concurrent readers, CSV export
//! - **Communication**: Crossbeam channels for thread-safe data transfer
//!
//! ## Configuration
//!
//! The last used connection is remembered in the platform-appropriate data
//! directory under `dev.distance-monitor`:
//!
//! - **Linux**: `~/.local/share/dev.distance-monitor/`
//! - **macOS**: `~/Library/Application Support/dev.distance-monitor/`
//! - **Windows**: `%APPDATA%\dev.distance-monitor\`
//!
//! ## Example
//!
//! ```ignore
//! use distance_monitor::{
//!     backend::{BackendMessage, MonitorBackend},
//!     config::{AppConfig, AppState},
//! };
//!
//! let mut config = AppConfig::default();
//! AppState::load_or_default().apply_to(&mut config);
//!
//! let (backend, client) = MonitorBackend::new(&config);
//! std::thread::spawn(move || backend.run());
//!
//! client.start(config.link.clone(), config.acquisition.clone());
//! while let Some(msg) = client.recv_timeout(std::time::Duration::from_secs(1)) {
//!     if let BackendMessage::Sample(sample) = msg {
//!         println!("{}", sample);
//!     }
//! }
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use analysis::{DistanceUnit, SpikeDetector};
pub use backend::{BackendCommand, BackendMessage, LinkHandle, MonitorBackend, MonitorClient};
pub use config::{AcquisitionSettings, AppConfig, AppState, LinkConfig};
pub use error::{LinkError, MonitorError, ParseError, Result};
pub use session::{SessionBuffer, SessionReader};
pub use types::{AcquisitionStats, LinkState, PortInfo, Sample};
