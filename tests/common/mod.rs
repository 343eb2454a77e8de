//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use distance_monitor::backend::BackendMessage;
use distance_monitor::MonitorClient;
use std::time::{Duration, Instant};

/// Upper bound for waiting on backend messages
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Receive messages until one matches `pred`, collecting everything seen
///
/// Returns the matching message, or `None` after [`test_timeout`].
pub fn wait_for<F>(client: &MonitorClient, seen: &mut Vec<BackendMessage>, pred: F) -> Option<BackendMessage>
where
    F: Fn(&BackendMessage) -> bool,
{
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if let Some(msg) = client.recv_timeout(Duration::from_millis(20)) {
            let hit = pred(&msg);
            seen.push(msg.clone());
            if hit {
                return Some(msg);
            }
        }
    }
    None
}

/// Poll `cond` until it holds or [`test_timeout`] passes
pub fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
