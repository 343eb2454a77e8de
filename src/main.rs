//! Distance Monitor - Main Entry Point
//!
//! Command line front end for the acquisition backend: lists serial ports
//! and streams samples to stdout, optionally exporting the session as CSV.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, Receiver};
use distance_monitor::{
    analysis::DistanceUnit,
    backend::{
        list_ports, BackendCommand, BackendMessage, Connector, MockConnector, MockGenerator,
        MockPattern, MonitorBackend, PortRegistry, SerialPortConnector, MOCK_PORT,
    },
    config::{AppConfig, AppState, DEFAULT_EXPORT_FILE},
    session::{export_csv_file, SessionReader},
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Stream and record readings from a serial distance sensor
#[derive(Debug, Parser)]
#[command(name = "distance-monitor", version, about)]
struct Cli {
    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports on this host
    Ports {
        /// List the simulated device instead
        #[arg(long)]
        mock: bool,
    },
    /// Stream samples until Enter is pressed or the duration elapses
    Stream(StreamArgs),
}

#[derive(Debug, Args)]
struct StreamArgs {
    /// Serial port (`COM5`, `/dev/ttyUSB0`)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Sample interval in milliseconds (10-1000)
    #[arg(short, long, value_name = "MS")]
    rate: Option<u64>,

    /// Display unit: meters, centimeters or inches
    #[arg(short, long)]
    unit: Option<DistanceUnit>,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Export the session to this CSV file when streaming stops
    #[arg(short, long, value_name = "FILE", num_args = 0..=1, default_missing_value = DEFAULT_EXPORT_FILE)]
    export: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Stream from a simulated sensor
    #[arg(long)]
    mock: bool,

    /// Do not flag spikes
    #[arg(long)]
    no_spikes: bool,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,distance_monitor=debug"))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "distance-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(file_layer)
        .init();

    guard
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    match cli.command {
        Command::Ports { mock } => {
            let ports = if mock {
                MockConnector::new().available_ports()
            } else {
                list_ports()
            };
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{:<16} {}", port.port_name, port.display);
            }
            Ok(())
        }
        Command::Stream(args) => stream(args),
    }
}

/// Resolve configuration: CLI flags > config file > remembered state > defaults
fn resolve_config(args: &StreamArgs, state: &AppState) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            let mut config = AppConfig::default();
            state.apply_to(&mut config);
            config
        }
    };

    if let Some(port) = &args.port {
        config.link.port = port.clone();
    } else if args.mock {
        config.link.port = MOCK_PORT.to_string();
    }
    if let Some(baud) = args.baud {
        config.link.baud_rate = baud;
    }
    if let Some(rate) = args.rate {
        config.acquisition.sample_rate_ms = rate;
    }
    if let Some(unit) = args.unit {
        config.acquisition.unit = unit;
    }
    if args.no_spikes {
        config.acquisition.spike_flagging = false;
        config.export.include_spike_notes = false;
    }
    if args.mock {
        config.link.settle_delay_ms = 0;
    }
    config.acquisition = config.acquisition.validated();
    Ok(config)
}

/// Signal that fires once on Enter or end of stdin
fn stdin_stop_signal() -> Receiver<()> {
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = tx.send(());
    });
    rx
}

fn mock_connector(config: &AppConfig) -> MockConnector {
    let interval = Duration::from_millis(config.acquisition.sample_rate_ms / 2).max(Duration::from_millis(5));
    let generator = MockGenerator::new(MockPattern::default(), interval)
        .with_noise(0.01)
        .with_spikes(40)
        .with_garbage(25);
    MockConnector::new().with_generator(generator)
}

fn stream(args: StreamArgs) -> anyhow::Result<()> {
    let mut state = AppState::load_or_default();
    let config = resolve_config(&args, &state)?;

    let connector: Arc<dyn Connector> = if args.mock {
        Arc::new(mock_connector(&config))
    } else {
        Arc::new(SerialPortConnector)
    };

    let (backend, client) =
        MonitorBackend::with_connector(&config, connector, PortRegistry::global().clone());
    let backend_thread = std::thread::Builder::new()
        .name("backend".to_string())
        .spawn(move || backend.run())
        .context("spawning backend thread")?;

    tracing::info!(
        "Streaming from {} at {} baud ({} ms, {})",
        config.link.port,
        config.link.baud_rate,
        config.acquisition.sample_rate_ms,
        config.acquisition.unit
    );
    client
        .request(BackendCommand::Start {
            link: config.link.clone(),
            acquisition: config.acquisition.clone(),
        })
        .context("starting acquisition")?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop_signal = match deadline {
        Some(_) => None,
        None => {
            eprintln!("Press Enter to stop");
            Some(stdin_stop_signal())
        }
    };

    let mut reader: Option<SessionReader> = None;
    let mut stop_requested = false;
    let mut failure: Option<String> = None;

    loop {
        if !stop_requested {
            let stdin_stop = stop_signal.as_ref().is_some_and(|rx| rx.try_recv().is_ok());
            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if stdin_stop || timed_out {
                stop_requested = true;
                client.stop();
            }
        }

        let Some(msg) = client.recv_timeout(Duration::from_millis(50)) else {
            continue;
        };
        match msg {
            BackendMessage::SessionStarted { port, reader: r } => {
                tracing::info!("Session started on {}", port);
                reader = Some(r);
            }
            BackendMessage::Sample(sample) => println!("{}", sample),
            BackendMessage::MalformedLine { line, reason } => {
                tracing::debug!("Malformed line {:?}: {}", line, reason);
            }
            BackendMessage::Stats(stats) => {
                tracing::debug!(
                    "{} samples, {} malformed, {} dropped, {:.1} samples/s",
                    stats.samples_accepted,
                    stats.malformed_lines,
                    stats.dropped_messages,
                    stats.effective_sample_rate
                );
            }
            BackendMessage::LinkStatus(link_state) => tracing::debug!("Link {}", link_state),
            BackendMessage::ConnectionError(e) => {
                failure = Some(e);
                break;
            }
            BackendMessage::SessionEnded(summary) => {
                eprintln!(
                    "Stopped after {:.1} s: {} samples, {} malformed lines, {} spikes ({:.1} samples/s)",
                    summary.duration.as_secs_f64(),
                    summary.samples_accepted,
                    summary.malformed_lines,
                    summary.spikes,
                    summary.effective_rate()
                );
                break;
            }
            BackendMessage::SessionFailed(e) => {
                failure = Some(e);
                break;
            }
            BackendMessage::PortList(_) => {}
            BackendMessage::Shutdown => break,
        }
    }

    client.shutdown();
    if backend_thread.join().is_err() {
        tracing::error!("Backend thread panicked");
    }

    if let (Some(path), Some(reader)) = (&args.export, &reader) {
        let rows = export_csv_file(reader, path, &config.export)
            .with_context(|| format!("exporting to {}", path.display()))?;
        eprintln!("Exported {} samples to {}", rows, path.display());
    }

    if !args.mock && reader.is_some() {
        state.update_last_connection(&config.link, config.acquisition.unit);
        if let Err(e) = state.save() {
            tracing::warn!("Failed to save app state: {}", e);
        }
    }

    if let Some(e) = failure {
        bail!(e);
    }
    Ok(())
}
