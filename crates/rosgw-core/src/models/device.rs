//! Device inventory records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric device identifier assigned by the registry (never 0)
pub type DeviceId = u64;

/// Default API port of a device
pub const DEFAULT_DEVICE_PORT: u16 = 8728;

/// Default per-command timeout in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 300_000;

fn default_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

/// Last known device status as recorded in the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Live session established and verified
    Online,
    /// Explicitly disconnected
    Offline,
    /// Dial, login or liveness check failed
    Error,
    /// Never contacted
    #[default]
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Error => "error",
            DeviceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed device as stored in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub uuid: String,
    pub name: String,
    /// Network address (host name or IP)
    pub hostname: String,
    pub username: String,
    /// Login password, never rendered in responses
    #[serde(skip_serializing, default)]
    pub password: String,
    pub keepalive: bool,
    /// Per-command timeout in milliseconds
    pub timeout: u64,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceDescriptor {
    /// `host:port` address used for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Request body for registering a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub hostname: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub keepalive: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateDeviceRequest {
    /// Check required fields are present
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("hostname", &self.hostname),
            ("username", &self.username),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} is required", field));
            }
        }
        if self.port == 0 {
            return Err("port must be non-zero".into());
        }
        Ok(())
    }
}

/// Partial update of a device; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDeviceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keepalive: Option<bool>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateDeviceRequest {
    /// Whether a live session must be dropped for this update to take effect
    pub fn affects_connection(&self) -> bool {
        self.hostname.is_some()
            || self.port.is_some()
            || self.username.is_some()
            || self.password.is_some()
            || self.is_active == Some(false)
    }
}

/// Status update written by the connection manager or the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: DeviceStatus,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
    /// Defaults to the time the update is applied
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            status,
            version: None,
            uptime: None,
            last_seen: None,
        }
    }

    pub fn with_info(mut self, version: Option<String>, uptime: Option<String>) -> Self {
        self.version = version;
        self.uptime = uptime;
        self
    }
}

/// Request body for toggling the activation flag
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActiveUpdate {
    pub is_active: bool,
}
