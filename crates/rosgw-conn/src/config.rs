//! Connection layer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_dial_timeout_ms() -> u64 {
    20_000
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_auto_connect() -> bool {
    true
}

fn default_sink_capacity() -> usize {
    64
}

/// Settings for the connection manager and telemetry multiplexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound for dial + login
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Interval between health sweeps
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Connect every active device at startup
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    /// Buffered samples per consumer before samples are dropped
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: default_dial_timeout_ms(),
            health_interval_secs: default_health_interval_secs(),
            auto_connect: default_auto_connect(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

impl ConnectionConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let config: ConnectionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.dial_timeout(), Duration::from_secs(20));
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert!(config.auto_connect);
        assert_eq!(config.sink_capacity, 64);
    }
}
