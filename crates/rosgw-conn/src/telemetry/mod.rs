//! Live telemetry: shared device subscriptions and per-client streaming

mod multiplexer;
mod streaming;

pub use multiplexer::{SubscriptionHandle, SubscriptionKey, TelemetryMultiplexer};
pub use streaming::{
    parse_stream_list, ClientMessage, EventWriter, MonitorEvent, StreamingRequest,
    StreamingSession, StreamingSummary, WriteError,
};
