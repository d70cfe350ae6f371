//! IP address handlers

use axum::extract::{Query, State};
use axum::Json;
use rosgw_core::Address;

use super::{param, RouterQuery};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn list_addresses(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse<Vec<Address>>>, ApiError> {
    let device_id = query.router_id()?;
    Ok(ApiResponse::ok(
        state.connections().list_addresses(device_id).await?,
    ))
}

pub async fn add_address(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let interface = param(&query.interface);
    let address = param(&query.address);
    state
        .connections()
        .add_address(device_id, interface, address)
        .await?;
    Ok(ApiResponse::message(format!(
        "Address {} added to {}",
        address, interface
    )))
}

pub async fn remove_address(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let id = param(&query.id);
    state.connections().remove_address(device_id, id).await?;
    Ok(ApiResponse::message(format!("Address {} removed", id)))
}
