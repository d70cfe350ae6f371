//! Shared fixtures for connection-layer tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rosgw_conn::{ConnectionConfig, ConnectionManager, SimulatedDevice, SimulatedDialer, TelemetryMultiplexer};
use rosgw_core::{CreateDeviceRequest, DeviceId, DeviceRegistry, InMemoryRegistry};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub dialer: Arc<SimulatedDialer>,
    pub manager: Arc<ConnectionManager>,
    pub multiplexer: Arc<TelemetryMultiplexer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let dialer = Arc::new(SimulatedDialer::new().with_sample_interval(SAMPLE_INTERVAL));
        let manager = ConnectionManager::new(
            registry.clone() as Arc<dyn DeviceRegistry>,
            dialer.clone(),
            config,
        );
        let multiplexer = TelemetryMultiplexer::new(manager.clone());
        Self {
            registry,
            dialer,
            manager,
            multiplexer,
        }
    }

    /// Register an active device backed by a simulated router
    pub fn add_device(&self, name: &str, interfaces: &[&str]) -> (DeviceId, Arc<SimulatedDevice>) {
        self.add_device_with(name, interfaces, true)
    }

    pub fn add_device_with(
        &self,
        name: &str,
        interfaces: &[&str],
        active: bool,
    ) -> (DeviceId, Arc<SimulatedDevice>) {
        let device = self.dialer.add_device(
            format!("{}:8728", name),
            SimulatedDevice::with_interfaces(interfaces.iter().copied())
                .with_credentials("admin", "secret"),
        );
        let descriptor = self
            .registry
            .insert(device_request(name, active))
            .expect("valid device");
        (descriptor.id, device)
    }
}

pub fn device_request(name: &str, active: bool) -> CreateDeviceRequest {
    CreateDeviceRequest {
        name: name.to_string(),
        hostname: name.to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        keepalive: true,
        timeout: 300_000,
        port: 8728,
        location: None,
        description: None,
        is_active: active,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
