use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history::{self, Entity as OrderStatusHistoryEntity},
    },
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Deserialize)]
pub struct OrderListFilter {
    pub customer_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1))]
    pub status: String,
    #[serde(default)]
    pub override_terminal: bool,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1))]
    pub verified_by: String,
    #[validate(length(min = 1))]
    pub transaction_ref: String,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub status_history: Vec<order_status_history::Model>,
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(pagination): Query<ListQuery>,
    Query(filter): Query<OrderListFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
    if let Some(customer_id) = filter.customer_id {
        query = query.filter(order::Column::CustomerId.eq(customer_id));
    }
    if let Some(status) = filter.status.as_deref() {
        let status = OrderStatus::parse(status).ok_or_else(|| {
            ServiceError::ValidationError(format!("Unknown order status '{status}'"))
        })?;
        query = query.filter(order::Column::OrderStatus.eq(status.as_str()));
    }

    let limit = pagination.limit.clamp(1, 100);
    let page = pagination.page.max(1);
    let paginator = query.paginate(&*state.db, limit);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page - 1).await?;
    let total_pages = total.div_ceil(limit);

    Ok(success_response(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

/// GET /api/v1/orders/:id
///
/// Reads go through the expiry fast path so a stale `payment_pending` order
/// is never shown as still payable past its window.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = OrderEntity::find_by_id(id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {id} not found")))?;
    let order = state.services.expiry.reconcile(order).await?;

    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(id))
        .all(&*state.db)
        .await?;
    let status_history = OrderStatusHistoryEntity::find()
        .filter(order_status_history::Column::OrderId.eq(id))
        .order_by_asc(order_status_history::Column::CreatedAt)
        .all(&*state.db)
        .await?;

    Ok(success_response(ApiResponse::success(OrderDetail {
        order,
        items,
        status_history,
    })))
}

/// PUT /api/v1/orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;
    let new_status = OrderStatus::parse(&request.status).ok_or_else(|| {
        ServiceError::ValidationError(format!("Unknown order status '{}'", request.status))
    })?;
    let order = state
        .services
        .order_status
        .update_status(id, new_status, request.override_terminal, request.message)
        .await?;
    Ok(success_response(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/confirm-payment
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;
    let order = state
        .services
        .order_status
        .confirm_manual_payment(id, &request.verified_by, &request.transaction_ref)
        .await?;
    Ok(success_response(ApiResponse::success(order)))
}

/// POST /api/v1/orders/:id/retry-payment
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.payments.retry_payment(id).await?;
    Ok(success_response(ApiResponse::success(order)))
}
