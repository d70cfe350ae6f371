//! Device inventory
//!
//! The gateway reads device descriptors from a [`DeviceRegistry`] and
//! records connection status into it. [`InMemoryRegistry`] is the bundled
//! keyed record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    CreateDeviceRequest, DeviceDescriptor, DeviceId, DeviceStatus, StatusUpdate,
    UpdateDeviceRequest,
};

/// Keyed store of device descriptors
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get(&self, id: DeviceId) -> GatewayResult<DeviceDescriptor>;

    /// All devices, newest first
    async fn list(&self) -> GatewayResult<Vec<DeviceDescriptor>>;

    /// Active devices, newest first
    async fn list_active(&self) -> GatewayResult<Vec<DeviceDescriptor>>;

    async fn create(&self, request: CreateDeviceRequest) -> GatewayResult<DeviceDescriptor>;

    async fn update(
        &self,
        id: DeviceId,
        request: UpdateDeviceRequest,
    ) -> GatewayResult<DeviceDescriptor>;

    async fn update_status(&self, id: DeviceId, update: StatusUpdate) -> GatewayResult<()>;

    async fn set_active(&self, id: DeviceId, active: bool) -> GatewayResult<DeviceDescriptor>;

    async fn delete(&self, id: DeviceId) -> GatewayResult<()>;
}

#[derive(Default)]
struct RegistryInner {
    next_id: DeviceId,
    devices: HashMap<DeviceId, DeviceDescriptor>,
}

/// In-process device registry
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the given devices
    pub fn with_devices(
        devices: impl IntoIterator<Item = CreateDeviceRequest>,
    ) -> GatewayResult<Self> {
        let registry = Self::new();
        for request in devices {
            registry.insert(request)?;
        }
        Ok(registry)
    }

    /// Insert a device synchronously
    pub fn insert(&self, request: CreateDeviceRequest) -> GatewayResult<DeviceDescriptor> {
        request.validate().map_err(GatewayError::InvalidRequest)?;

        let mut inner = self.inner.write();
        inner.next_id += 1;
        let now = Utc::now();
        let device = DeviceDescriptor {
            id: inner.next_id,
            uuid: Uuid::new_v4().to_string(),
            name: request.name,
            hostname: request.hostname,
            username: request.username,
            password: request.password,
            keepalive: request.keepalive,
            timeout: request.timeout,
            port: request.port,
            location: request.location,
            description: request.description,
            is_active: request.is_active,
            last_seen: None,
            status: DeviceStatus::Unknown,
            version: None,
            uptime: None,
            created_at: now,
            updated_at: now,
        };
        inner.devices.insert(device.id, device.clone());
        debug!(device_id = device.id, name = %device.name, "Registered device");
        Ok(device)
    }

    fn sorted(&self, filter: impl Fn(&DeviceDescriptor) -> bool) -> Vec<DeviceDescriptor> {
        let inner = self.inner.read();
        let mut devices: Vec<_> = inner.devices.values().filter(|d| filter(d)).cloned().collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        devices
    }

    fn modify<T>(
        &self,
        id: DeviceId,
        f: impl FnOnce(&mut DeviceDescriptor) -> T,
    ) -> GatewayResult<T> {
        let mut inner = self.inner.write();
        let device = inner
            .devices
            .get_mut(&id)
            .ok_or(GatewayError::NotFound(id))?;
        Ok(f(device))
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn get(&self, id: DeviceId) -> GatewayResult<DeviceDescriptor> {
        self.inner
            .read()
            .devices
            .get(&id)
            .cloned()
            .ok_or(GatewayError::NotFound(id))
    }

    async fn list(&self) -> GatewayResult<Vec<DeviceDescriptor>> {
        Ok(self.sorted(|_| true))
    }

    async fn list_active(&self) -> GatewayResult<Vec<DeviceDescriptor>> {
        Ok(self.sorted(|d| d.is_active))
    }

    async fn create(&self, request: CreateDeviceRequest) -> GatewayResult<DeviceDescriptor> {
        self.insert(request)
    }

    async fn update(
        &self,
        id: DeviceId,
        request: UpdateDeviceRequest,
    ) -> GatewayResult<DeviceDescriptor> {
        self.modify(id, |device| {
            if let Some(name) = request.name {
                device.name = name;
            }
            if let Some(hostname) = request.hostname {
                device.hostname = hostname;
            }
            if let Some(username) = request.username {
                device.username = username;
            }
            if let Some(password) = request.password {
                device.password = password;
            }
            if let Some(keepalive) = request.keepalive {
                device.keepalive = keepalive;
            }
            if let Some(timeout) = request.timeout {
                device.timeout = timeout;
            }
            if let Some(port) = request.port {
                device.port = port;
            }
            if request.location.is_some() {
                device.location = request.location;
            }
            if request.description.is_some() {
                device.description = request.description;
            }
            if let Some(active) = request.is_active {
                device.is_active = active;
            }
            device.updated_at = Utc::now();
            device.clone()
        })
    }

    async fn update_status(&self, id: DeviceId, update: StatusUpdate) -> GatewayResult<()> {
        self.modify(id, |device| {
            device.status = update.status;
            if update.version.is_some() {
                device.version = update.version;
            }
            if update.uptime.is_some() {
                device.uptime = update.uptime;
            }
            device.last_seen = Some(update.last_seen.unwrap_or_else(Utc::now));
            device.updated_at = Utc::now();
        })
    }

    async fn set_active(&self, id: DeviceId, active: bool) -> GatewayResult<DeviceDescriptor> {
        self.modify(id, |device| {
            device.is_active = active;
            device.updated_at = Utc::now();
            device.clone()
        })
    }

    async fn delete(&self, id: DeviceId) -> GatewayResult<()> {
        self.inner
            .write()
            .devices
            .remove(&id)
            .map(|_| ())
            .ok_or(GatewayError::NotFound(id))
    }
}
