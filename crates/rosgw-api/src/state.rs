//! Application state for the gateway API

use std::sync::Arc;
use std::time::Duration;

use rosgw_conn::{ConnectionManager, TelemetryMultiplexer};
use rosgw_core::DeviceRegistry;
use tokio_util::sync::CancellationToken;

/// Default bound for `/api/connections/connect`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    registry: Arc<dyn DeviceRegistry>,
    connections: Arc<ConnectionManager>,
    multiplexer: Arc<TelemetryMultiplexer>,
    connect_timeout: Duration,
    /// Cancelled when the server stops; streaming sessions run under child tokens
    shutdown: CancellationToken,
}

impl AppState {
    /// Build the state from a multiplexer and the manager/registry behind it
    pub fn new(multiplexer: Arc<TelemetryMultiplexer>) -> Self {
        let connections = Arc::clone(multiplexer.connections());
        let registry = Arc::clone(connections.registry());
        Self {
            registry,
            connections,
            multiplexer,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn multiplexer(&self) -> &Arc<TelemetryMultiplexer> {
        &self.multiplexer
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
