use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Order aggregate root. Created once at checkout, mutated only by payment
/// reconciliation, the expiry reconciler, or the status authority. Never
/// deleted; cancellation is a state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-facing display id, e.g. `ORD-1A2B3C4D`.
    pub order_number: String,
    pub customer_id: Uuid,
    pub order_status: String,
    pub payment_status: String,
    pub payment_method: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub final_amount: Decimal,
    pub currency: String,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    /// JSON snapshot of the shipping address at checkout time. Address edits
    /// must never retroactively change past orders.
    pub shipping_address: String,
    pub payment_expires_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub gateway_intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_signature: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}

/// Fulfillment axis of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PaymentPending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PaymentPending => "payment_pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_pending" => Some(OrderStatus::PaymentPending),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are immutable without an explicit override.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Payment axis of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "expired" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Gateway-backed payment with a short confirmation window.
    Online,
    /// Out-of-band payment verified by a human, with a long window.
    Assisted,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::Assisted => "assisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(PaymentMethod::Online),
            "assisted" => Some(PaymentMethod::Assisted),
            _ => None,
        }
    }
}

/// Combined view over the two status columns. Storage keeps the axes
/// separate, but every read goes through this so illegal pairings (shipped
/// while unpaid, expired while processing) surface as errors instead of
/// silently flowing onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    AwaitingPayment,
    Paid,
    Shipped,
    Delivered,
    Cancelled { payment: PaymentStatus },
}

impl OrderState {
    pub fn from_axes(order_status: &str, payment_status: &str) -> Result<Self, ServiceError> {
        let status = OrderStatus::parse(order_status).ok_or_else(|| {
            ServiceError::InternalError(format!("unknown order status '{order_status}'"))
        })?;
        let payment = PaymentStatus::parse(payment_status).ok_or_else(|| {
            ServiceError::InternalError(format!("unknown payment status '{payment_status}'"))
        })?;

        let state = match (status, payment) {
            (OrderStatus::PaymentPending, PaymentStatus::Pending)
            | (OrderStatus::PaymentPending, PaymentStatus::Failed) => OrderState::AwaitingPayment,
            (OrderStatus::Processing, PaymentStatus::Completed) => OrderState::Paid,
            (OrderStatus::Shipped, PaymentStatus::Completed) => OrderState::Shipped,
            (OrderStatus::Delivered, PaymentStatus::Completed)
            | (OrderStatus::Delivered, PaymentStatus::Refunded) => OrderState::Delivered,
            (OrderStatus::Cancelled, payment) => OrderState::Cancelled { payment },
            (status, payment) => {
                return Err(ServiceError::InternalError(format!(
                    "illegal order state: {} with payment {}",
                    status.as_str(),
                    payment.as_str()
                )))
            }
        };
        Ok(state)
    }

    /// Legal transitions on the fulfillment axis. Leaving a terminal state is
    /// handled separately via the admin override.
    pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (from, to) {
            (PaymentPending, Processing) => true,
            (PaymentPending, Cancelled) => true,
            (Processing, Shipped) => true,
            (Shipped, Delivered) => true,
            // Any non-terminal state may be cancelled.
            (Processing, Cancelled) | (Shipped, Cancelled) => true,
            _ => false,
        }
    }
}

impl Model {
    pub fn order_state(&self) -> Result<OrderState, ServiceError> {
        OrderState::from_axes(&self.order_status, &self.payment_status)
    }

    pub fn is_payment_expired(&self, now: DateTime<Utc>) -> bool {
        self.order_status == OrderStatus::PaymentPending.as_str()
            && now > self.payment_expires_at
    }
}
