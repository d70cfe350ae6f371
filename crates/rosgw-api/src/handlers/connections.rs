//! Connection lifecycle handlers

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use rosgw_conn::ConnectionInfo;
use tracing::{info, warn};

use super::RouterQuery;
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// GET|POST /api/connections/status
pub async fn connection_status(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ConnectionInfo>>> {
    ApiResponse::ok(state.connections().connections())
}

/// GET|POST /api/connections/connect?router_id=
///
/// The dial keeps running in the background when the request-level timeout
/// fires, so a slow device still ends up connected.
pub async fn connect_router(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let timeout = state.connect_timeout();

    let connections = Arc::clone(state.connections());
    let attempt = tokio::spawn(async move { connections.get_or_connect(device_id).await });

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(_session))) => {
            info!(device_id, "Router connected");
            Ok(ApiResponse::message(format!(
                "Successfully connected to router {}",
                device_id
            )))
        }
        Ok(Ok(Err(e))) => Err(e.into()),
        Ok(Err(join)) => Err(ApiError::Internal(format!("connect task failed: {}", join))),
        Err(_) => {
            warn!(device_id, ?timeout, "Connect request timed out");
            Err(ApiError::RequestTimeout(format!(
                "Connection timeout after {} seconds",
                timeout.as_secs()
            )))
        }
    }
}

/// GET|POST /api/connections/disconnect?router_id=
pub async fn disconnect_router(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    state.connections().disconnect(device_id).await?;
    Ok(ApiResponse::message(format!(
        "Disconnected from router {}",
        device_id
    )))
}
