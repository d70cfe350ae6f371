//! Configuration objects read from and written to devices

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn flag(attrs: &HashMap<String, String>, key: &str) -> bool {
    attrs.get(key).map(|v| v == "true").unwrap_or(false)
}

fn text(attrs: &HashMap<String, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

/// A network interface as listed by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub running: bool,
    pub disabled: bool,
    /// Counters are opaque device strings
    #[serde(rename = "rx-bytes", default, skip_serializing_if = "String::is_empty")]
    pub rx_bytes: String,
    #[serde(rename = "tx-bytes", default, skip_serializing_if = "String::is_empty")]
    pub tx_bytes: String,
    #[serde(rename = "rx-packets", default, skip_serializing_if = "String::is_empty")]
    pub rx_packets: String,
    #[serde(rename = "tx-packets", default, skip_serializing_if = "String::is_empty")]
    pub tx_packets: String,
}

impl Interface {
    pub fn from_attrs(attrs: &HashMap<String, String>) -> Self {
        Self {
            name: text(attrs, "name"),
            kind: text(attrs, "type"),
            running: flag(attrs, "running"),
            disabled: flag(attrs, "disabled"),
            rx_bytes: text(attrs, "rx-bytes"),
            tx_bytes: text(attrs, "tx-bytes"),
            rx_packets: text(attrs, "rx-packets"),
            tx_packets: text(attrs, "tx-packets"),
        }
    }

    /// Whether live traffic can be monitored on this interface
    pub fn is_monitorable(&self) -> bool {
        self.running && !self.disabled
    }
}

/// An IP address assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub address: String,
    pub interface: String,
    pub network: String,
    pub disabled: bool,
}

impl Address {
    pub fn from_attrs(attrs: &HashMap<String, String>) -> Self {
        Self {
            id: text(attrs, ".id"),
            address: text(attrs, "address"),
            interface: text(attrs, "interface"),
            network: text(attrs, "network"),
            disabled: flag(attrs, "disabled"),
        }
    }
}

/// A simple queue (per-target rate limit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub name: String,
    pub target: String,
    #[serde(rename = "max-limit")]
    pub max_limit: String,
    #[serde(rename = "burst-limit", default)]
    pub burst_limit: String,
    pub disabled: bool,
}

impl Queue {
    pub fn from_attrs(attrs: &HashMap<String, String>) -> Self {
        Self {
            id: text(attrs, ".id"),
            name: text(attrs, "name"),
            target: text(attrs, "target"),
            max_limit: text(attrs, "max-limit"),
            burst_limit: text(attrs, "burst-limit"),
            disabled: flag(attrs, "disabled"),
        }
    }
}

/// Version and uptime reported by a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: Option<String>,
    pub uptime: Option<String>,
}
