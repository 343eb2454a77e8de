//! Test data builders for creating test objects

use distance_monitor::config::{AcquisitionSettings, LinkConfig};
use distance_monitor::DistanceUnit;

/// Builder for the byte stream a mock device sends
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A well-formed `<timestamp>,<distance>` line
    pub fn frame(mut self, timestamp_ms: u64, distance_m: f64) -> Self {
        self.bytes
            .extend_from_slice(format!("{},{}\n", timestamp_ms, distance_m).as_bytes());
        self
    }

    /// Any raw line, newline appended
    pub fn line(mut self, line: &str) -> Self {
        self.bytes.extend_from_slice(line.as_bytes());
        self.bytes.push(b'\n');
        self
    }

    /// Frames at 100 ms spacing with the given distances
    pub fn frames(mut self, distances: &[f64]) -> Self {
        for (i, &d) in distances.iter().enumerate() {
            self = self.frame((i as u64 + 1) * 100, d);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Builder for link configs tuned for fast tests
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    pub fn new(port: &str) -> Self {
        Self {
            config: LinkConfig {
                port: port.to_string(),
                read_timeout_ms: 20,
                settle_delay_ms: 0,
                ..LinkConfig::default()
            },
        }
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn build(self) -> LinkConfig {
        self.config
    }
}

/// Fast acquisition settings in `unit`
pub fn fast_settings(unit: DistanceUnit) -> AcquisitionSettings {
    AcquisitionSettings::new()
        .with_unit(unit)
        .with_sample_rate_ms(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_builder() {
        let script = ScriptBuilder::new().frame(100, 1.5).line("bad").build();
        assert_eq!(script, b"100,1.5\nbad\n".to_vec());
    }

    #[test]
    fn test_link_config_builder() {
        let config = LinkConfigBuilder::new("MOCK1").settle_delay_ms(5).build();
        assert_eq!(config.port, "MOCK1");
        assert_eq!(config.settle_delay_ms, 5);
        assert_eq!(config.read_timeout_ms, 20);
    }
}
