//! rosgw-core - Core traits and types for the router gateway
//!
//! This crate provides the abstractions shared by the connection layer and
//! the HTTP façade:
//!
//! - the device capability boundary ([`Dialer`], [`DeviceSession`]) that a
//!   wire-protocol implementation plugs into,
//! - the device inventory ([`DeviceRegistry`]) the gateway reads descriptors
//!   from and records status into,
//! - the shared data model and the [`GatewayError`] taxonomy.

pub mod error;
pub mod models;
pub mod registry;
pub mod session;

pub use error::{GatewayError, GatewayResult};
pub use models::*;
pub use registry::{DeviceRegistry, InMemoryRegistry};
pub use session::{
    Command, DeviceSession, DialTarget, Dialer, Listener, Reply, Sentence, SentenceKind,
    SessionError,
};
