//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use entitle_core::EntitlementError;
use entitle_store::StoreError;

use crate::sweeper::SweepError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - operation cannot run in the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Domain error from the entitlement engine.
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Status code for a domain error.
fn entitlement_status(err: &EntitlementError) -> StatusCode {
    match err {
        EntitlementError::UnknownFeature { .. } => StatusCode::NOT_FOUND,
        EntitlementError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        EntitlementError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        EntitlementError::NotActive { .. } | EntitlementError::AlreadyActive { .. } => {
            StatusCode::CONFLICT
        }
        EntitlementError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::Entitlement(err) => {
                let details = match err {
                    EntitlementError::InsufficientCredits { balance, required } => {
                        Some(serde_json::json!({
                            "balance": balance,
                            "required": required
                        }))
                    }
                    _ => None,
                };
                (entitlement_status(err), err.code(), err.message(), details)
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record not found".into()),
            StoreError::InvalidAmount(amount) => {
                Self::BadRequest(format!("amount must be positive, got {amount}"))
            }
            StoreError::InsufficientCredits { balance, required } => {
                Self::Entitlement(EntitlementError::InsufficientCredits { balance, required })
            }
            other => Self::Entitlement(EntitlementError::Unavailable(other.to_string())),
        }
    }
}

impl From<SweepError> for ApiError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::AlreadyRunning => Self::Conflict(err.to_string()),
            SweepError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}
