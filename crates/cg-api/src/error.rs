//! Error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Body of every non-2xx JSON response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: &'static str,
    pub message: String,
    pub status: u16,
}

#[derive(Debug)]
pub enum ApiError {
    /// The request could not be mapped to a destination
    Validation(String),
    /// Delivery was not confirmed
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (detail, message) = match self {
            ApiError::Validation(message) => ("Validation error", message),
            ApiError::Internal(message) => ("Internal server error", message),
        };
        let body = ErrorBody {
            detail,
            message,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::routing::RoutingError> for ApiError {
    fn from(e: crate::routing::RoutingError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<cg_broker::BrokerError> for ApiError {
    fn from(e: cg_broker::BrokerError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
