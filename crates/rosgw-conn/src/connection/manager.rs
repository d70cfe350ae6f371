//! Connection manager
//!
//! Owns the device id → [`Session`] map. The map lock is held only for
//! lookups and mutations; dialing happens under a per-device connect gate
//! so concurrent callers for one device share a single dial while callers
//! for other devices never wait.
//!
//! The health sweep works on a snapshot, so every step of a check first
//! confirms the probed session is still the installed one. A session that
//! was disconnected or replaced meanwhile is left alone.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use rosgw_core::{
    Command, DeviceDescriptor, DeviceId, DeviceRegistry, DeviceSession, DeviceStatus, DialTarget,
    Dialer, GatewayError, GatewayResult, Reply, SessionError, StatusUpdate,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConnectionInfo, Session};
use crate::config::ConnectionConfig;
use crate::gate::GateMap;

/// Manages at most one live session per device
pub struct ConnectionManager {
    registry: Arc<dyn DeviceRegistry>,
    dialer: Arc<dyn Dialer>,
    config: ConnectionConfig,
    sessions: Mutex<HashMap<DeviceId, Arc<Session>>>,
    connect_gates: GateMap<DeviceId>,
    shutdown: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        dialer: Arc<dyn Dialer>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dialer,
            config,
            sessions: Mutex::new(HashMap::new()),
            connect_gates: GateMap::new(),
            shutdown: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    /// Current session for a device, healthy or not
    pub fn session(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&device_id).cloned()
    }

    pub fn is_connected(&self, device_id: DeviceId) -> bool {
        self.session(device_id).is_some()
    }

    /// Status of every live session, ordered by device id
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.sessions.lock().values().map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.router_id);
        infos
    }

    /// Return the healthy session for a device, connecting if needed
    pub async fn get_or_connect(&self, device_id: DeviceId) -> GatewayResult<Arc<Session>> {
        if let Some(session) = self.healthy_session(device_id) {
            return Ok(session);
        }

        let _gate = self.connect_gates.acquire(&device_id).await;

        let stale = {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get(&device_id).filter(|s| s.is_healthy()) {
                return Ok(session.clone());
            }
            sessions.remove(&device_id)
        };
        if let Some(stale) = stale {
            info!(device_id, "Evicting unhealthy session before reconnect");
            stale.close().await;
        }

        self.connect_locked(device_id).await
    }

    /// Replace `stale` with a fresh session, unless it was already
    /// disconnected or replaced
    async fn reconnect(&self, stale: &Arc<Session>) -> GatewayResult<Option<Arc<Session>>> {
        let device_id = stale.device_id();
        let _gate = self.connect_gates.acquire(&device_id).await;

        {
            let mut sessions = self.sessions.lock();
            if !sessions.get(&device_id).is_some_and(|s| Arc::ptr_eq(s, stale)) {
                return Ok(None);
            }
            sessions.remove(&device_id);
        }
        info!(device_id, "Evicting unhealthy session before reconnect");
        stale.close().await;

        self.connect_locked(device_id).await.map(Some)
    }

    /// Dial and install a session; the caller holds the connect gate and
    /// the map has no entry for the device
    async fn connect_locked(&self, device_id: DeviceId) -> GatewayResult<Arc<Session>> {
        let descriptor = self.registry.get(device_id).await?;
        if !descriptor.is_active {
            debug!(device_id, "Refusing to connect inactive device");
            return Err(GatewayError::Inactive(device_id));
        }

        let link = match self.dial(&descriptor).await {
            Ok(link) => link,
            Err(e) => {
                warn!(device_id, error = %e, "Failed to connect");
                self.record_status(device_id, StatusUpdate::new(DeviceStatus::Error))
                    .await;
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(&descriptor, link));
        self.sessions.lock().insert(device_id, session.clone());
        info!(device_id, name = %descriptor.name, address = %descriptor.address(), "Connected to device");

        self.refresh_status(&session).await;
        Ok(session)
    }

    /// Close and forget the session for a device
    pub async fn disconnect(&self, device_id: DeviceId) -> GatewayResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(&device_id)
            .ok_or(GatewayError::NotConnected(device_id))?;

        session.close().await;
        self.record_status(device_id, StatusUpdate::new(DeviceStatus::Offline))
            .await;
        info!(device_id, "Disconnected from device");
        Ok(())
    }

    /// Run one command against a device under its command lock
    pub async fn run_command(&self, device_id: DeviceId, command: &Command) -> GatewayResult<Reply> {
        let session = self.get_or_connect(device_id).await?;
        session.run(command).await
    }

    /// Connect every active device; failures are logged
    ///
    /// Returns the number of devices connected.
    pub async fn connect_active(&self) -> usize {
        let devices = match self.registry.list_active().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "Failed to list active devices");
                return 0;
            }
        };

        info!(count = devices.len(), "Auto-connecting active devices");
        let results = join_all(devices.iter().map(|d| self.get_or_connect(d.id))).await;

        let mut connected = 0;
        for (device, result) in devices.iter().zip(results) {
            match result {
                Ok(_) => connected += 1,
                Err(e) => warn!(device_id = device.id, name = %device.name, error = %e, "Auto-connect failed"),
            }
        }
        connected
    }

    /// Spawn the periodic health sweep
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.sweep_handle.lock();
        if handle.is_some() {
            return;
        }

        let manager = Arc::clone(self);
        let period = self.config.health_interval();
        let shutdown = self.shutdown.clone();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_once().await,
                }
            }
            debug!("Health sweep stopped");
        }));
        info!(interval = ?period, "Health sweep started");
    }

    /// Run one health-sweep pass over a snapshot of the live sessions
    pub async fn sweep_once(self: &Arc<Self>) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        if sessions.is_empty() {
            return;
        }

        debug!(count = sessions.len(), "Running health sweep");
        join_all(sessions.into_iter().map(|s| self.check_session(s))).await;
    }

    /// Stop the health sweep and close every session
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close().await;
        }
        info!(closed = sessions.len(), "Connection manager shut down");
    }

    async fn check_session(self: &Arc<Self>, session: Arc<Session>) {
        let device_id = session.device_id();
        if !self.is_current(&session) {
            return;
        }

        let result = session.system_info().await;
        if !self.is_current(&session) {
            debug!(device_id, "Session went away during health check, result ignored");
            return;
        }

        match result {
            Ok(info) => {
                session.mark_healthy();
                self.record_status(
                    device_id,
                    StatusUpdate::new(DeviceStatus::Online).with_info(info.version, info.uptime),
                )
                .await;
            }
            Err(e) => {
                warn!(device_id, error = %e, "Health check failed");
                session.mark_unhealthy();
                self.record_status(device_id, StatusUpdate::new(DeviceStatus::Error))
                    .await;

                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    match manager.reconnect(&session).await {
                        Ok(Some(_)) => info!(device_id, "Reconnected after failed health check"),
                        Ok(None) => debug!(device_id, "Session already replaced, reconnect skipped"),
                        Err(e) => {
                            warn!(device_id, error = %e, "Reconnect failed, retrying next sweep")
                        }
                    }
                });
            }
        }
    }

    /// Whether `session` is open and still installed for its device
    fn is_current(&self, session: &Arc<Session>) -> bool {
        !session.closed_token().is_cancelled()
            && self
                .sessions
                .lock()
                .get(&session.device_id())
                .is_some_and(|s| Arc::ptr_eq(s, session))
    }

    /// Devices with a connect in progress or queued
    pub fn pending_connects(&self) -> usize {
        self.connect_gates.len()
    }

    fn healthy_session(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .get(&device_id)
            .filter(|s| s.is_healthy())
            .cloned()
    }

    /// Dial + login raced against the configured timeout
    ///
    /// The dial runs in its own task; a session that completes after the
    /// timeout is closed instead of being leaked.
    async fn dial(&self, descriptor: &DeviceDescriptor) -> GatewayResult<Arc<dyn DeviceSession>> {
        let device_id = descriptor.id;
        let timeout = self.config.dial_timeout();
        let target = DialTarget {
            address: descriptor.address(),
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
        };

        debug!(device_id, address = %target.address, ?timeout, "Dialing device");

        let dialer = Arc::clone(&self.dialer);
        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = dialer.dial(&target).await;
            if let Err(Ok(late)) = tx.send(result) {
                debug!(device_id, "Closing session established after dial timeout");
                late.close().await;
            }
        });

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Ok(link))) => Ok(link),
            Ok(Ok(Err(SessionError::Auth(reason)))) => {
                Err(GatewayError::AuthFailed { device_id, reason })
            }
            Ok(Ok(Err(e))) => Err(GatewayError::Transport {
                device_id,
                reason: e.to_string(),
            }),
            Ok(Err(_)) => Err(GatewayError::Transport {
                device_id,
                reason: "dial task aborted".into(),
            }),
            Err(_) => {
                rx.close();
                if let Ok(Ok(late)) = rx.try_recv() {
                    late.close().await;
                }
                Err(GatewayError::DialTimeout { device_id, timeout })
            }
        }
    }

    /// Best-effort version/uptime refresh after connecting
    async fn refresh_status(&self, session: &Session) {
        let device_id = session.device_id();
        let update = match session.system_info().await {
            Ok(info) => StatusUpdate::new(DeviceStatus::Online).with_info(info.version, info.uptime),
            Err(e) => {
                debug!(device_id, error = %e, "Could not fetch system info");
                StatusUpdate::new(DeviceStatus::Online)
            }
        };
        self.record_status(device_id, update).await;
    }

    async fn record_status(&self, device_id: DeviceId, update: StatusUpdate) {
        let status = update.status;
        if let Err(e) = self.registry.update_status(device_id, update).await {
            debug!(device_id, %status, error = %e, "Failed to record device status");
        }
    }
}
