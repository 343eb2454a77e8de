//! Integration tests for session lifecycle
//!
//! These tests validate how sessions start and stop:
//! - Restarting never holds two handles to the same port
//! - A port that cannot be opened leaves the link closed
//! - Ports held elsewhere in the process are refused
//! - Shutdown releases the port

mod common;

use common::builders::{fast_settings, LinkConfigBuilder, ScriptBuilder};
use common::mock_helpers::{spawn_backend, spawn_backend_with_registry};
use common::{eventually, wait_for};
use distance_monitor::backend::{BackendMessage, LinkHandle, MockConnector, PortRegistry};
use distance_monitor::{DistanceUnit, LinkError, LinkState};
use serial_test::serial;
use std::io::ErrorKind;

#[test]
fn test_restart_cancels_previous_session() {
    let device = MockConnector::new();
    let backend = spawn_backend(&device);
    let client = &backend.client;
    let mut seen = Vec::new();

    for _ in 0..3 {
        client.start(LinkConfigBuilder::new("MOCK0").build(), fast_settings(DistanceUnit::Meters));
        assert!(wait_for(client, &mut seen, |m| matches!(m, BackendMessage::SessionStarted { .. })).is_some());
    }
    client.stop();
    assert!(eventually(|| device.open_handles() == 0));

    assert_eq!(device.connects(), 3);
    assert_eq!(device.max_open_handles(), 1);
    assert_eq!(device.control_log(), b"sxsxsx".to_vec());

    let ended = seen
        .iter()
        .filter(|m| matches!(m, BackendMessage::SessionEnded(_)))
        .count();
    assert!(ended >= 2);
    backend.shutdown();
}

#[test]
fn test_restart_starts_with_empty_buffer() {
    let device = MockConnector::new().with_script(&ScriptBuilder::new().frames(&[1.0, 1.1]).build());
    let backend = spawn_backend(&device);
    let client = &backend.client;
    let mut seen = Vec::new();

    client.start(LinkConfigBuilder::new("MOCK0").build(), fast_settings(DistanceUnit::Meters));
    let Some(BackendMessage::SessionStarted { reader: first, .. }) =
        wait_for(client, &mut seen, |m| matches!(m, BackendMessage::SessionStarted { .. }))
    else {
        panic!("first session did not start");
    };
    assert!(eventually(|| first.len() == 2));

    client.start(LinkConfigBuilder::new("MOCK0").build(), fast_settings(DistanceUnit::Meters));
    let Some(BackendMessage::SessionStarted { reader: second, .. }) =
        wait_for(client, &mut seen, |m| matches!(m, BackendMessage::SessionStarted { .. }))
    else {
        panic!("second session did not start");
    };
    assert!(second.is_empty());
    assert_eq!(first.len(), 2);
    backend.shutdown();
}

#[test]
fn test_open_failure_leaves_link_closed() {
    let device = MockConnector::new();
    device.fail_open(Some(ErrorKind::NotFound));
    let backend = spawn_backend(&device);
    let client = &backend.client;
    let mut seen = Vec::new();

    client.start(LinkConfigBuilder::new("COM99").build(), fast_settings(DistanceUnit::Meters));
    let err = wait_for(client, &mut seen, |m| matches!(m, BackendMessage::ConnectionError(_)));
    let Some(BackendMessage::ConnectionError(reason)) = err else {
        panic!("no connection error: {:?}", seen);
    };
    assert!(reason.contains("COM99"));

    let last_state = seen.iter().rev().find_map(|m| match m {
        BackendMessage::LinkStatus(state) => Some(*state),
        _ => None,
    });
    assert_eq!(last_state, Some(LinkState::Closed));
    assert!(!seen.iter().any(|m| matches!(m, BackendMessage::SessionStarted { .. })));
    assert_eq!(device.open_handles(), 0);
    backend.shutdown();
}

#[test]
fn test_stop_without_session_is_noop() {
    let device = MockConnector::new();
    let backend = spawn_backend(&device);
    backend.client.stop();
    backend.client.stop();
    backend.shutdown();
    assert_eq!(device.connects(), 0);
    assert!(device.control_log().is_empty());
}

#[test]
#[serial]
fn test_port_held_elsewhere_is_refused() {
    let device = MockConnector::new();
    let registry = PortRegistry::global().clone();
    let held = LinkHandle::open(LinkConfigBuilder::new("MOCK-BUSY").build(), &device, &registry).unwrap();

    let backend = spawn_backend_with_registry(&device, registry.clone());
    let client = &backend.client;
    let mut seen = Vec::new();

    client.start(LinkConfigBuilder::new("MOCK-BUSY").build(), fast_settings(DistanceUnit::Meters));
    assert!(wait_for(client, &mut seen, |m| matches!(m, BackendMessage::ConnectionError(_))).is_some());
    assert_eq!(device.max_open_handles(), 1);

    drop(held);
    assert!(!registry.is_open("MOCK-BUSY"));
    backend.shutdown();
}

#[test]
#[serial]
fn test_second_open_in_process_fails() {
    let device = MockConnector::new();
    let registry = PortRegistry::global();
    let config = LinkConfigBuilder::new("MOCK-TWICE").build();

    let mut first = LinkHandle::open(config.clone(), &device, registry).unwrap();
    let second = LinkHandle::open(config.clone(), &device, registry);
    assert!(matches!(second, Err(LinkError::PortUnavailable { .. })));

    first.close();
    let third = LinkHandle::open(config, &device, registry).unwrap();
    assert_eq!(third.state(), LinkState::Open);
}

#[test]
fn test_shutdown_releases_port() {
    let device = MockConnector::new();
    let backend = spawn_backend(&device);
    let registry = backend.registry.clone();
    let mut seen = Vec::new();

    backend
        .client
        .start(LinkConfigBuilder::new("MOCK0").build(), fast_settings(DistanceUnit::Meters));
    assert!(wait_for(&backend.client, &mut seen, |m| matches!(m, BackendMessage::SessionStarted { .. })).is_some());
    assert!(registry.is_open("MOCK0"));

    backend.shutdown();
    assert!(!registry.is_open("MOCK0"));
    assert_eq!(device.control_log(), b"sx".to_vec());
}
