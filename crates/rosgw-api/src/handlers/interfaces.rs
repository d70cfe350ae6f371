//! Interface handlers

use axum::extract::{Query, State};
use axum::Json;
use rosgw_core::Interface;

use super::{param, RouterQuery};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// GET /api/interfaces?router_id=
pub async fn list_interfaces(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse<Vec<Interface>>>, ApiError> {
    let device_id = query.router_id()?;
    let interfaces = state.connections().list_interfaces(device_id).await?;
    Ok(ApiResponse::ok(interfaces))
}

/// GET /api/interfaces/list?router_id=
///
/// Only interfaces that are running and enabled, i.e. worth monitoring.
pub async fn list_monitorable_interfaces(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse<Vec<Interface>>>, ApiError> {
    let device_id = query.router_id()?;
    let interfaces = state
        .connections()
        .list_monitorable_interfaces(device_id)
        .await?;
    Ok(ApiResponse::ok(interfaces))
}

/// GET|POST /api/interfaces/enable?router_id=&name=
pub async fn enable_interface(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let name = param(&query.name);
    state.connections().enable_interface(device_id, name).await?;
    Ok(ApiResponse::message(format!("Interface {} enabled", name)))
}

/// GET|POST /api/interfaces/disable?router_id=&name=
pub async fn disable_interface(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let name = param(&query.name);
    state.connections().disable_interface(device_id, name).await?;
    Ok(ApiResponse::message(format!("Interface {} disabled", name)))
}
