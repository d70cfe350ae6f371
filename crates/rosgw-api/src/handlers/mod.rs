//! HTTP and WebSocket handlers

pub mod addresses;
pub mod connections;
pub mod health;
pub mod interfaces;
pub mod monitor;
pub mod queues;
pub mod routers;
pub mod traffic;

use axum::http::{Method, Uri};
use rosgw_core::DeviceId;
use serde::Deserialize;

use crate::error::ApiError;

pub(crate) const ROUTER_ID_REQUIRED: &str = "router_id is required and must be valid";

/// Query parameters shared by the device-scoped endpoints
///
/// Everything is optional at this level; handlers decide what they need and
/// missing values surface as 400 responses.
#[derive(Debug, Default, Deserialize)]
pub struct RouterQuery {
    pub router_id: Option<String>,
    pub name: Option<String>,
    pub interface: Option<String>,
    pub interfaces: Option<String>,
    pub address: Option<String>,
    pub id: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "max-limit")]
    pub max_limit: Option<String>,
}

impl RouterQuery {
    /// Parse `router_id`; absent, malformed and zero ids are rejected
    pub fn router_id(&self) -> Result<DeviceId, ApiError> {
        self.router_id
            .as_deref()
            .and_then(parse_device_id)
            .ok_or_else(|| ApiError::BadRequest(ROUTER_ID_REQUIRED.to_string()))
    }
}

pub(crate) fn parse_device_id(raw: &str) -> Option<DeviceId> {
    raw.trim().parse::<DeviceId>().ok().filter(|id| *id != 0)
}

/// Borrow an optional parameter, treating absence as empty
pub(crate) fn param(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Router fallback for unknown paths
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

/// Known path, unsupported method
pub async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed(format!("{} not allowed on {}", method, uri.path()))
}
