//! Simple queue handlers

use axum::extract::{Query, State};
use axum::Json;
use rosgw_core::Queue;

use super::{param, RouterQuery};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn list_queues(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse<Vec<Queue>>>, ApiError> {
    let device_id = query.router_id()?;
    Ok(ApiResponse::ok(state.connections().list_queues(device_id).await?))
}

pub async fn add_queue(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let name = param(&query.name);
    state
        .connections()
        .add_queue(
            device_id,
            name,
            param(&query.target),
            param(&query.max_limit),
        )
        .await?;
    Ok(ApiResponse::message(format!("Queue {} added", name)))
}

pub async fn remove_queue(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse>, ApiError> {
    let device_id = query.router_id()?;
    let id = param(&query.id);
    state.connections().remove_queue(device_id, id).await?;
    Ok(ApiResponse::message(format!("Queue {} removed", id)))
}
