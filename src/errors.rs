use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error body returned to API callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request").
    pub error: String,
    /// Human-readable error description.
    pub message: String,
    /// ISO 8601 timestamp when the error occurred.
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    // Checkout validation failures; each surfaces a specific reason to the
    // caller.
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    #[error("Coupon invalid: {0}")]
    CouponInvalid(String),

    // Payment lifecycle failures.
    #[error("Payment initiation failed: {0}")]
    PaymentInitiationFailed(String),

    #[error("Payment verification failed")]
    PaymentVerificationFailed,

    #[error("Order payment window has expired")]
    OrderExpired,

    #[error("Order is already paid")]
    OrderAlreadyPaid,

    #[error("Illegal status transition: {0}")]
    IllegalTransition(String),

    // Ambient failures.
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::VariantNotFound(_)
            | Self::CouponInvalid(_)
            | Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::IllegalTransition(_) => StatusCode::BAD_REQUEST,
            Self::AddressNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PaymentInitiationFailed(_) | Self::ExternalServiceError(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::PaymentVerificationFailed => StatusCode::PAYMENT_REQUIRED,
            Self::OrderExpired | Self::OrderAlreadyPaid => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// text to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.response_message(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(json!(body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ServiceError::EmptyCart.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::OrderExpired.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentVerificationFailed.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn internal_details_are_scrubbed() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");
        let err = ServiceError::CouponInvalid("Coupon has expired".into());
        assert!(err.response_message().contains("expired"));
    }
}
