//! Liveness endpoints

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::response::ApiResponse;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<ApiResponse<HealthStatus>> {
    ApiResponse::ok_with_message(
        HealthStatus {
            status: "ok",
            timestamp: Utc::now(),
        },
        "API is running",
    )
}

pub async fn ws_health() -> Json<ApiResponse<HealthStatus>> {
    ApiResponse::ok_with_message(
        HealthStatus {
            status: "ok",
            timestamp: Utc::now(),
        },
        "WebSocket endpoint is available",
    )
}
