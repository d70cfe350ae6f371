//! Shared data models for the gateway

mod device;
mod resources;
mod telemetry;

pub use device::*;
pub use resources::*;
pub use telemetry::*;
