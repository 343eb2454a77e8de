//! Integration tests for configuration files and remembered state

use distance_monitor::config::{AppConfig, AppState, LinkConfig, MAX_SAMPLE_RATE_MS};
use distance_monitor::DistanceUnit;

#[test]
fn test_state_remembers_last_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app_state.json");

    let mut state = AppState::default();
    let link = LinkConfig {
        baud_rate: 9600,
        ..LinkConfig::new("COM3")
    };
    state.update_last_connection(&link, DistanceUnit::Centimeters);
    state.save_to(&path).unwrap();

    let mut config = AppConfig::default();
    AppState::load_from(&path).unwrap().apply_to(&mut config);
    assert_eq!(config.link.port, "COM3");
    assert_eq!(config.link.baud_rate, 9600);
    assert_eq!(config.acquisition.unit, DistanceUnit::Centimeters);
}

#[test]
fn test_file_settings_are_clamped_before_use() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("monitor.toml");
    std::fs::write(
        &path,
        "channel_capacity = 500\n\n[acquisition]\nsample_rate_ms = 5000\nunit = \"inches\"\nspike_threshold = -2.5\n",
    )
    .unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.channel_capacity, 500);

    let settings = config.acquisition.validated();
    assert_eq!(settings.sample_rate_ms, MAX_SAMPLE_RATE_MS);
    assert_eq!(settings.unit, DistanceUnit::Inches);
    assert_eq!(settings.spike_threshold, 2.5);
    assert!(settings.spike_flagging);
}

#[test]
fn test_corrupt_state_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app_state.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(AppState::load_from(&path).is_err());
}
