//! Device sessions and the connection manager

mod manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rosgw_core::{
    Command, DeviceDescriptor, DeviceId, DeviceSession, GatewayError, GatewayResult, Listener,
    Reply, SessionError, SystemInfo,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use manager::ConnectionManager;

/// Command used for liveness checks and version/uptime refresh
pub(crate) fn system_resource_command() -> Command {
    Command::new("/system/resource/print")
}

/// One live authenticated channel to a device
///
/// Synchronous commands are serialized through [`Session::lock`];
/// subscriptions opened with [`Session::listen`] bypass that lock.
pub struct Session {
    device_id: DeviceId,
    name: String,
    hostname: String,
    link: Arc<dyn DeviceSession>,
    healthy: AtomicBool,
    last_activity: RwLock<DateTime<Utc>>,
    command_lock: Mutex<()>,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(descriptor: &DeviceDescriptor, link: Arc<dyn DeviceSession>) -> Self {
        Self {
            device_id: descriptor.id,
            name: descriptor.name.clone(),
            hostname: descriptor.hostname.clone(),
            link,
            healthy: AtomicBool::new(true),
            last_activity: RwLock::new(Utc::now()),
            command_lock: Mutex::new(()),
            closed: CancellationToken::new(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && !self.closed.is_cancelled()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    pub(crate) fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
        *self.last_activity.write() = Utc::now();
    }

    pub(crate) fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    /// Token cancelled once the session is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Acquire the command lock
    ///
    /// Multi-step operations hold the returned guard so no other command
    /// for this device interleaves.
    pub async fn lock(&self) -> CommandGuard<'_> {
        let guard = self.command_lock.lock().await;
        CommandGuard {
            session: self,
            _guard: guard,
        }
    }

    /// Run a single command under the command lock
    pub async fn run(&self, command: &Command) -> GatewayResult<Reply> {
        self.lock().await.run(command).await
    }

    /// Open a continuous subscription without taking the command lock
    pub async fn listen(&self, command: &Command) -> Result<Listener, SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let listener = self.link.listen(command).await?;
        *self.last_activity.write() = Utc::now();
        Ok(listener)
    }

    /// Fetch version and uptime
    pub async fn system_info(&self) -> GatewayResult<SystemInfo> {
        let reply = self.run(&system_resource_command()).await?;
        let record = reply
            .records()
            .next()
            .ok_or_else(|| GatewayError::Device("no system info".into()))?;
        Ok(SystemInfo {
            version: record.get("version").cloned(),
            uptime: record.get("uptime").cloned(),
        })
    }

    pub(crate) async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.mark_unhealthy();
        self.link.close().await;
        debug!(device_id = self.device_id, "Session closed");
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            router_id: self.device_id,
            router_name: self.name.clone(),
            hostname: self.hostname.clone(),
            is_healthy: self.is_healthy(),
            last_ping: self.last_activity(),
        }
    }

    fn map_error(&self, command: &Command, error: SessionError) -> GatewayError {
        match error {
            SessionError::Trap { message } => {
                debug!(device_id = self.device_id, %command, %message, "Device trap");
                GatewayError::Device(message)
            }
            SessionError::Auth(reason) => {
                self.mark_unhealthy();
                GatewayError::AuthFailed {
                    device_id: self.device_id,
                    reason,
                }
            }
            other => {
                warn!(device_id = self.device_id, %command, error = %other, "Command transport failure");
                self.mark_unhealthy();
                GatewayError::Transport {
                    device_id: self.device_id,
                    reason: other.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a session's synchronous command path
pub struct CommandGuard<'a> {
    session: &'a Session,
    _guard: MutexGuard<'a, ()>,
}

impl CommandGuard<'_> {
    pub async fn run(&self, command: &Command) -> GatewayResult<Reply> {
        let session = self.session;
        if session.closed.is_cancelled() {
            return Err(GatewayError::NotConnected(session.device_id));
        }

        let reply = session
            .link
            .run(command)
            .await
            .map_err(|e| session.map_error(command, e))?;
        *session.last_activity.write() = Utc::now();

        if let Some(message) = reply.trap() {
            return Err(GatewayError::Device(message.to_string()));
        }
        Ok(reply)
    }
}

/// Snapshot of one live session for status listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub router_id: DeviceId,
    pub router_name: String,
    pub hostname: String,
    pub is_healthy: bool,
    pub last_ping: DateTime<Utc>,
}
