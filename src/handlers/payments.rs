use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;

use crate::{
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    services::payments::VerifyPaymentRequest,
    ApiResponse, AppState,
};

/// Signature header the gateway attaches to webhook deliveries.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// POST /api/v1/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;
    let order = state.services.payments.verify_client_payment(request).await?;
    Ok(success_response(ApiResponse::success(order)))
}

/// POST /api/v1/payments/webhook
///
/// Always answers 200 once the body is read. Deliveries with a bad or
/// missing signature are dropped server-side; signalling an error to the
/// gateway would only trigger redelivery of a payload we will never accept.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;
    Ok((StatusCode::OK, "ok"))
}
