use axum::{extract::State, response::IntoResponse, Json};

use crate::{
    errors::ServiceError,
    handlers::common::{created_response, validate_input},
    services::checkout::PlaceOrderRequest,
    ApiResponse, AppState,
};

/// POST /api/v1/checkout
///
/// Converts the customer's active cart into a pending order. For online
/// payment the response carries the gateway intent id the client completes
/// payment against.
pub async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;
    let order = state.services.checkout.place_order(request).await?;
    Ok(created_response(ApiResponse::success(order)))
}
