//! rosgw-conn - Device connections and live telemetry
//!
//! This crate owns the stateful part of the gateway:
//!
//! - [`ConnectionManager`]: at most one authenticated [`Session`] per
//!   device, bounded-time dialing, a periodic health sweep and serialized
//!   command execution
//! - [`TelemetryMultiplexer`]: one device subscription per
//!   (device, stream) shared by any number of consumers
//! - [`StreamingSession`]: per-client coordinator that merges several
//!   multiplexed streams into one outbound event channel
//! - the one-shot command path (interfaces, addresses, queues, single
//!   traffic samples)
//! - [`SimulatedDialer`]: an in-process device transport for tests and demos

pub mod commands;
pub mod config;
pub mod connection;
mod gate;
pub mod telemetry;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{CommandGuard, ConnectionInfo, ConnectionManager, Session};
pub use telemetry::{
    ClientMessage, EventWriter, MonitorEvent, StreamingRequest, StreamingSession,
    StreamingSummary, SubscriptionHandle, SubscriptionKey, TelemetryMultiplexer, WriteError,
};
pub use transport::{SimulatedDevice, SimulatedDialer};
