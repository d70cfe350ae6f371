//! Daemon configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file is a
//! valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rosgw_conn::{ConnectionConfig, SimulatedDevice, SimulatedDialer};
use rosgw_core::CreateDeviceRequest;
use serde::Deserialize;

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Seed inventory, one `[[device]]` table per router
    #[serde(default, rename = "device")]
    pub devices: Vec<CreateDeviceRequest>,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Configuration used when no file is given: one simulated router
    pub fn demo() -> Self {
        Self {
            devices: vec![CreateDeviceRequest {
                name: "demo-router".to_string(),
                hostname: "127.0.0.1".to_string(),
                username: "admin".to_string(),
                password: String::new(),
                keepalive: true,
                timeout: rosgw_core::DEFAULT_COMMAND_TIMEOUT_MS,
                port: rosgw_core::DEFAULT_DEVICE_PORT,
                location: Some("lab".to_string()),
                description: Some("Simulated router".to_string()),
                is_active: true,
            }],
            ..Default::default()
        }
    }
}

// =============================================================================
// Server
// =============================================================================

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Request-level bound for `/api/connections/connect`
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Simulator
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_interfaces() -> Vec<String> {
    ["ether1", "ether2", "wlan1"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// In-process routers standing in for the device transport
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Simulate any address that is not listed under `interfaces`
    #[serde(default = "default_true")]
    pub auto_provision: bool,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Added to every command on the listed devices
    #[serde(default)]
    pub latency_ms: u64,

    /// Interfaces of auto-provisioned devices
    #[serde(default = "default_interfaces")]
    pub default_interfaces: Vec<String>,

    /// `"host:port" = ["ether1", ...]`
    #[serde(default)]
    pub interfaces: HashMap<String, Vec<String>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            auto_provision: true,
            sample_interval_ms: default_sample_interval_ms(),
            latency_ms: 0,
            default_interfaces: default_interfaces(),
            interfaces: HashMap::new(),
        }
    }
}

impl SimulatorConfig {
    pub fn build_dialer(&self) -> SimulatedDialer {
        let mut dialer = SimulatedDialer::new()
            .with_sample_interval(Duration::from_millis(self.sample_interval_ms.max(1)));
        if self.auto_provision {
            dialer = dialer.with_auto_provision(self.default_interfaces.clone());
        }
        for (address, interfaces) in &self.interfaces {
            dialer.add_device(
                address.clone(),
                SimulatedDevice::with_interfaces(interfaces.iter().cloned())
                    .with_latency(Duration::from_millis(self.latency_ms)),
            );
        }
        dialer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.connection.dial_timeout_ms, 20_000);
        assert!(config.connection.auto_connect);
        assert!(config.devices.is_empty());
        assert!(config.simulator.auto_provision);
        assert_eq!(config.simulator.default_interfaces.len(), 3);
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
bind = "127.0.0.1:9090"
connect_timeout_secs = 10

[connection]
dial_timeout_ms = 5000
auto_connect = false

[[device]]
name = "core-1"
hostname = "10.0.0.1"
username = "admin"
password = "secret"

[[device]]
name = "edge-1"
hostname = "10.0.0.2"
port = 8729
username = "admin"
password = "secret"
is_active = false

[simulator]
auto_provision = false
sample_interval_ms = 250

[simulator.interfaces]
"10.0.0.1:8728" = ["ether1", "sfp1"]
"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9090");
        assert_eq!(config.server.connect_timeout_secs, 10);
        assert_eq!(config.connection.dial_timeout_ms, 5000);
        assert_eq!(config.connection.health_interval_secs, 30);
        assert!(!config.connection.auto_connect);

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].port, 8728);
        assert!(config.devices[0].is_active);
        assert_eq!(config.devices[1].port, 8729);
        assert!(!config.devices[1].is_active);

        assert!(!config.simulator.auto_provision);
        assert_eq!(config.simulator.sample_interval_ms, 250);
        let dialer = config.simulator.build_dialer();
        assert!(dialer.device("10.0.0.1:8728").is_some());
        assert!(dialer.device("10.0.0.2:8729").is_none());
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nbind = 8080\n").unwrap();
        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config"));
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config = DaemonConfig::demo();
        assert_eq!(config.devices.len(), 1);
        assert!(config.devices[0].validate().is_ok());
        assert!(config.simulator.auto_provision);
    }
}
