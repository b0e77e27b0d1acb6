//! JSON response envelope and error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use multiauth_core::Error;
use serde::Serialize;
use tracing::{error, warn};

/// Envelope of every API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        }
    }
}

/// Successful JSON response
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

/// Error returned by handlers
#[derive(Debug)]
pub enum ApiError {
    /// Error raised by a provider or the hub
    Provider(Error),
    NotFound(String),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Provider(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, ApiResponse::<()>::error("NotFound", message)),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, ApiResponse::<()>::error("BadRequest", message))
            }
            // Unknown users and wrong passwords look the same to clients
            ApiError::Provider(err) if err.is_authentication_failure() => {
                warn!("Authentication failed: {}", err);
                (
                    StatusCode::UNAUTHORIZED,
                    ApiResponse::<()>::error("AuthenticationFailed", "Invalid username or password"),
                )
            }
            ApiError::Provider(err) => {
                let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    error!("Request failed: {}", err);
                }
                (status, ApiResponse::<()>::error(err.code(), err.to_string()))
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult = std::result::Result<Response, ApiError>;
