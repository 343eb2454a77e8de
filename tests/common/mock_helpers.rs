//! Mock construction helpers

use distance_monitor::backend::{MockConnector, PortRegistry};
use distance_monitor::config::AppConfig;
use distance_monitor::{MonitorBackend, MonitorClient};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Backend running on its own thread against a mock device
pub struct RunningBackend {
    pub client: MonitorClient,
    pub registry: PortRegistry,
    handle: Option<JoinHandle<()>>,
}

impl RunningBackend {
    /// Shut the backend down and wait for its thread
    pub fn shutdown(mut self) {
        self.client.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for RunningBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.client.shutdown();
            let _ = handle.join();
        }
    }
}

/// Spawn a backend using `connector` and a private port registry
pub fn spawn_backend(connector: &MockConnector) -> RunningBackend {
    spawn_backend_with_registry(connector, PortRegistry::new())
}

/// Spawn a backend using `connector` and `registry`
pub fn spawn_backend_with_registry(connector: &MockConnector, registry: PortRegistry) -> RunningBackend {
    let config = AppConfig {
        channel_capacity: 1000,
        ..AppConfig::default()
    };
    let (backend, client) =
        MonitorBackend::with_connector(&config, Arc::new(connector.clone()), registry.clone());
    let handle = std::thread::spawn(move || backend.run());
    RunningBackend {
        client,
        registry,
        handle: Some(handle),
    }
}
