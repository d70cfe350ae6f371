//! Live traffic telemetry

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceId;

/// One traffic sample for an interface
///
/// Counter and rate values are passed through exactly as the device
/// reported them; no arithmetic is performed on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub router_id: DeviceId,
    pub interface_name: String,
    pub rx_bytes: String,
    pub tx_bytes: String,
    pub rx_packets: String,
    pub tx_packets: String,
    pub rx_bits_per_second: String,
    pub tx_bits_per_second: String,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Build a sample from a `monitor-traffic` data record
    pub fn from_attrs(
        router_id: DeviceId,
        interface_name: &str,
        attrs: &HashMap<String, String>,
    ) -> Self {
        let get = |key: &str| attrs.get(key).cloned().unwrap_or_default();
        Self {
            router_id,
            interface_name: interface_name.to_string(),
            rx_bytes: get("rx-bytes"),
            tx_bytes: get("tx-bytes"),
            rx_packets: get("rx-packets"),
            tx_packets: get("tx-packets"),
            rx_bits_per_second: get("rx-bits-per-second"),
            tx_bits_per_second: get("tx-bits-per-second"),
            timestamp: Utc::now(),
        }
    }
}
