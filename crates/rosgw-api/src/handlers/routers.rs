//! Device inventory handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use rosgw_core::{
    ActiveUpdate, CreateDeviceRequest, DeviceDescriptor, DeviceId, GatewayError, StatusUpdate,
    UpdateDeviceRequest,
};
use tracing::{info, warn};

use super::parse_device_id;
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

type DeviceResponse = Result<Json<ApiResponse<DeviceDescriptor>>, ApiError>;

fn device_id(raw: &str) -> Result<DeviceId, ApiError> {
    parse_device_id(raw).ok_or_else(|| ApiError::BadRequest("Invalid router ID".to_string()))
}

/// Drop the live session of a device, ignoring "not connected"
async fn drop_session(state: &AppState, id: DeviceId) {
    match state.connections().disconnect(id).await {
        Ok(()) => info!(device_id = id, "Closed session after inventory change"),
        Err(GatewayError::NotConnected(_)) => {}
        Err(e) => warn!(device_id = id, error = %e, "Failed to close session"),
    }
}

/// GET /api/routers
pub async fn list_routers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DeviceDescriptor>>>, ApiError> {
    Ok(ApiResponse::ok(state.registry().list().await?))
}

/// GET /api/routers/active
pub async fn list_active_routers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DeviceDescriptor>>>, ApiError> {
    Ok(ApiResponse::ok(state.registry().list_active().await?))
}

/// POST /api/routers
pub async fn create_router(
    State(state): State<AppState>,
    payload: Result<Json<CreateDeviceRequest>, JsonRejection>,
) -> DeviceResponse {
    let Json(request) = payload?;
    let device = state.registry().create(request).await?;
    info!(device_id = device.id, name = %device.name, "Router created");
    Ok(ApiResponse::ok_with_message(device, "Router created"))
}

/// GET /api/routers/{id}
pub async fn get_router(State(state): State<AppState>, Path(id): Path<String>) -> DeviceResponse {
    let id = device_id(&id)?;
    Ok(ApiResponse::ok(state.registry().get(id).await?))
}

/// PUT /api/routers/{id}
///
/// Changing how the device is reached drops its live session so the next
/// request dials with the new settings.
pub async fn update_router(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDeviceRequest>, JsonRejection>,
) -> DeviceResponse {
    let id = device_id(&id)?;
    let Json(request) = payload?;
    let reconnect = request.affects_connection();

    let device = state.registry().update(id, request).await?;
    if reconnect {
        drop_session(&state, id).await;
    }
    Ok(ApiResponse::ok_with_message(device, "Router updated"))
}

/// PATCH /api/routers/{id}/status
pub async fn update_router_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let id = device_id(&id)?;
    let Json(update) = payload?;
    state.registry().update_status(id, update).await?;
    Ok(ApiResponse::message("Router status updated"))
}

/// PATCH /api/routers/{id}/active
pub async fn set_router_active(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ActiveUpdate>, JsonRejection>,
) -> DeviceResponse {
    let id = device_id(&id)?;
    let Json(ActiveUpdate { is_active }) = payload?;

    let device = state.registry().set_active(id, is_active).await?;
    if !is_active {
        drop_session(&state, id).await;
    }
    let message = if is_active {
        "Router activated"
    } else {
        "Router deactivated"
    };
    Ok(ApiResponse::ok_with_message(device, message))
}

/// DELETE /api/routers/{id}
pub async fn delete_router(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let id = device_id(&id)?;
    state.registry().delete(id).await?;
    drop_session(&state, id).await;
    info!(device_id = id, "Router deleted");
    Ok(ApiResponse::message("Router deleted"))
}
