//! Common error types for the gateway

use std::time::Duration;

use thiserror::Error;

use crate::models::DeviceId;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the connection layer and the inventory
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Unknown device id
    #[error("router {0} not found")]
    NotFound(DeviceId),

    /// Device exists but is deactivated
    #[error("router {0} is not active")]
    Inactive(DeviceId),

    /// Dial + login did not finish within the configured bound
    #[error("connection to router {device_id} timed out after {timeout:?}")]
    DialTimeout {
        device_id: DeviceId,
        timeout: Duration,
    },

    /// Device rejected the credentials
    #[error("login to router {device_id} failed: {reason}")]
    AuthFailed { device_id: DeviceId, reason: String },

    /// I/O failure while dialing or talking to a live session
    #[error("transport error on router {device_id}: {reason}")]
    Transport { device_id: DeviceId, reason: String },

    /// Operation requires a live session and there is none
    #[error("router {0} not connected")]
    NotConnected(DeviceId),

    /// A session could not be obtained for a streaming subscription
    #[error("router {device_id} connection unavailable: {reason}")]
    ConnectionUnavailable { device_id: DeviceId, reason: String },

    /// Device refused to open a stream
    #[error("failed to start monitoring {stream} on router {device_id}: {reason}")]
    SubscribeFailed {
        device_id: DeviceId,
        stream: String,
        reason: String,
    },

    /// Some, but not all, streams of a client session failed to start
    #[error("failed to start {} of {requested} stream(s): {}", .failed.len(), .failed.join("; "))]
    PartialStartFailure {
        failed: Vec<String>,
        requested: usize,
    },

    /// Device reported an error for a one-shot command
    #[error("{0}")]
    Device(String),

    /// Invalid parameter or request
    #[error("{0}")]
    InvalidRequest(String),

    /// Inventory storage failure
    #[error("registry error: {0}")]
    Registry(String),
}

impl GatewayError {
    /// Whether the error means the underlying session can no longer be trusted
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_start_failure_message() {
        let err = GatewayError::PartialStartFailure {
            failed: vec!["ether9: no such item".into(), "wlan7: no such item".into()],
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "failed to start 2 of 3 stream(s): ether9: no such item; wlan7: no such item"
        );
    }

    #[test]
    fn test_dial_timeout_message_names_device() {
        let err = GatewayError::DialTimeout {
            device_id: 7,
            timeout: Duration::from_secs(20),
        };
        assert!(err.to_string().contains("router 7"));
        assert!(!err.is_transport());
    }
}
