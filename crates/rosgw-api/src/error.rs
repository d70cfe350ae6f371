//! API error types and conversions

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rosgw_core::GatewayError;

use crate::response::ApiResponse;

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 404 Not Found
    NotFound(String),
    /// 405 Method Not Allowed
    MethodNotAllowed(String),
    /// 408 Request Timeout
    RequestTimeout(String),
    /// 500 Internal Server Error
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_message(self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::RequestTimeout(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.into_message();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), %message, "API error");
        } else {
            tracing::debug!(status = status.as_u16(), %message, "API client error");
        }

        (status, Json(ApiResponse::error(message))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(_) => ApiError::NotFound(err.to_string()),
            GatewayError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            GatewayError::DialTimeout { .. } => ApiError::RequestTimeout(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gateway_error_status_mapping() {
        let cases = [
            (GatewayError::NotFound(7), StatusCode::NOT_FOUND),
            (
                GatewayError::InvalidRequest("interface is required".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::DialTimeout {
                    device_id: 7,
                    timeout: Duration::from_secs(20),
                },
                StatusCode::REQUEST_TIMEOUT,
            ),
            (GatewayError::Inactive(7), StatusCode::INTERNAL_SERVER_ERROR),
            (GatewayError::NotConnected(7), StatusCode::INTERNAL_SERVER_ERROR),
            (
                GatewayError::Device("no such item".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_invalid_request_keeps_message() {
        let err = ApiError::from(GatewayError::InvalidRequest("name is required".into()));
        assert_eq!(err.into_message(), "name is required");
    }
}
