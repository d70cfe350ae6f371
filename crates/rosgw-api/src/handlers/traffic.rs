//! One-shot traffic sample

use axum::extract::{Query, State};
use axum::Json;
use rosgw_core::TelemetrySample;

use super::{param, RouterQuery};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;

/// GET /api/traffic/once?router_id=&interface=
pub async fn traffic_once(
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Result<Json<ApiResponse<TelemetrySample>>, ApiError> {
    let device_id = query.router_id()?;
    let sample = state
        .connections()
        .traffic_once(device_id, param(&query.interface))
        .await?;
    Ok(ApiResponse::ok(sample))
}
