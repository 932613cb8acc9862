use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::utils::http_client::HttpClientError;
use thiserror::Error;

use crate::gateways::GatewayError;

// Consistent error body for every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// Every error the commerce service can surface
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Deterministic decline from a gateway or disbursement provider
    #[error("Gateway rejected: {0}")]
    GatewayRejected(String),

    // Network failure, timeout or 5xx from a gateway
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // Signature / hash / amount check failed on inbound data
    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    // Result contradicts a state that is already terminal
    #[error("Conflicting state: {0}")]
    ConflictingState(String),

    // Sibling service (catalog, notification) unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::ConflictingState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    // Failures worth retrying later: the gateway should redeliver a webhook
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::GatewayUnavailable(_)
                | AppError::ServiceUnavailable(_)
                | AppError::Internal(_)
        )
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => AppError::GatewayUnavailable(msg),
            GatewayError::Rejected(msg) => AppError::GatewayRejected(msg),
            GatewayError::InvalidPayload(msg) => AppError::Validation(msg),
        }
    }
}

impl From<HttpClientError> for AppError {
    fn from(err: HttpClientError) -> Self {
        match err {
            HttpClientError::NotFound(msg) => AppError::NotFound(msg),
            HttpClientError::Unauthorized(msg) => AppError::Internal(format!("service auth failed: {}", msg)),
            other if other.is_transient() => AppError::ServiceUnavailable(other.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages.join(", "))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let debug_details = |detail: String| if cfg!(debug_assertions) { Some(detail) } else { None };

        let (status, error_type, message, details) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone(), None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            AppError::GatewayRejected(msg) => {
                tracing::warn!("Gateway rejected request: {}", msg);
                (
                    StatusCode::PAYMENT_REQUIRED,
                    "payment_rejected",
                    "The payment provider declined the request. Please try again or use another method.".to_string(),
                    debug_details(msg.clone()),
                )
            }
            AppError::GatewayUnavailable(msg) => {
                tracing::error!("Gateway unavailable: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_unavailable",
                    "The payment provider is not reachable right now. Please try again shortly.".to_string(),
                    debug_details(msg.clone()),
                )
            }
            AppError::IntegrityMismatch(msg) => (
                StatusCode::BAD_REQUEST,
                "integrity_mismatch",
                "Payment response could not be verified".to_string(),
                debug_details(msg.clone()),
            ),
            AppError::ConflictingState(msg) => (StatusCode::CONFLICT, "conflicting_state", msg.clone(), None),
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Dependency unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "A required service is temporarily unavailable".to_string(),
                    debug_details(msg.clone()),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "A database error occurred".to_string(),
                    debug_details(e.to_string()),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal server error occurred".to_string(),
                    debug_details(msg.clone()),
                )
            }
        };

        let body = ErrorResponse {
            success: false,
            error: error_type.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
