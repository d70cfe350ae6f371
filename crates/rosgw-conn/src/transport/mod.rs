//! Device transports
//!
//! The wire protocol is provided externally through [`rosgw_core::Dialer`].
//! This module ships an in-process simulated device used by tests and by
//! the daemon's demo mode.

pub mod simulated;

pub use simulated::{SimulatedDevice, SimulatedDialer};
