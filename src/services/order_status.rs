//! Order status authority.
//!
//! Administrative state transitions run through here: the transition table,
//! terminal-state protection, compensating inventory release on
//! cancellation, and manual payment confirmation for assisted orders.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{
        self, Entity as OrderEntity, OrderState, OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{self, NotificationChannel},
    services::{append_history, coupons::CouponService, inventory::InventoryService},
};

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    coupons: CouponService,
    notifier: Arc<dyn NotificationChannel>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        coupons: CouponService,
        notifier: Arc<dyn NotificationChannel>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            inventory,
            coupons,
            notifier,
            event_sender,
        }
    }

    /// Applies an administrative status transition.
    ///
    /// Terminal states (`delivered`, `cancelled`) are immutable unless
    /// `override_terminal` is set; the override also bypasses the transition
    /// table for operator intervention. Entering `cancelled` always releases
    /// reserved inventory, however the cancellation was triggered.
    #[instrument(skip(self, message), fields(order_id = %order_id, new_status = %new_status.as_str()))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        override_terminal: bool,
        message: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let current = OrderStatus::parse(&order.order_status).ok_or_else(|| {
            ServiceError::InternalError(format!("unknown order status '{}'", order.order_status))
        })?;

        if current == new_status {
            return Ok(order);
        }

        if !override_terminal {
            if current.is_terminal() {
                return Err(ServiceError::IllegalTransition(format!(
                    "cannot leave terminal state '{}' without override",
                    current.as_str()
                )));
            }
            if !OrderState::transition_allowed(current, new_status) {
                return Err(ServiceError::IllegalTransition(format!(
                    "'{}' -> '{}'",
                    current.as_str(),
                    new_status.as_str()
                )));
            }
            // The combined state must stay legal: e.g. an unpaid order cannot
            // be marked processing or delivered.
            if new_status != OrderStatus::Cancelled {
                OrderState::from_axes(new_status.as_str(), &order.payment_status).map_err(
                    |_| {
                        ServiceError::IllegalTransition(format!(
                            "'{}' is incompatible with payment status '{}'",
                            new_status.as_str(),
                            order.payment_status
                        ))
                    },
                )?;
            }
        }

        let old_status = order.order_status.clone();
        let payment_completed = order.payment_status == PaymentStatus::Completed.as_str();

        let mut active: order::ActiveModel = order.clone().into();
        active.order_status = Set(new_status.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(order.version + 1);
        let updated = active.update(&*self.db).await?;

        let note = message.unwrap_or_else(|| {
            format!("Status updated to {}", new_status.as_str())
        });
        append_history(&*self.db, order_id, new_status.as_str(), note).await?;

        if new_status == OrderStatus::Cancelled {
            self.inventory.release_order_best_effort(order_id).await;
            if !payment_completed {
                if let Err(e) = self.coupons.compensate(&order).await {
                    warn!(order_id = %order_id, error = %e, "coupon compensation failed on cancel");
                }
            }
            let _ = self.event_sender.send(Event::OrderCancelled(order_id)).await;
        }

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status.as_str(),
            "order status updated"
        );
        let _ = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: new_status.as_str().to_string(),
            })
            .await;

        notifications::notify_status_update(self.notifier.as_ref(), &updated).await;

        Ok(updated)
    }

    /// Confirms an assisted (out-of-band) payment after human verification.
    /// Follows the same completion semantics as gateway confirmation: a
    /// guarded update completes the payment exactly once.
    #[instrument(skip(self), fields(order_id = %order_id, verified_by))]
    pub async fn confirm_manual_payment(
        &self,
        order_id: Uuid,
        verified_by: &str,
        transaction_ref: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.payment_method != PaymentMethod::Assisted.as_str() {
            return Err(ServiceError::InvalidOperation(
                "Manual confirmation applies to assisted payment orders only".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Completed.as_str() {
            return Err(ServiceError::OrderAlreadyPaid);
        }
        if order.order_status != OrderStatus::PaymentPending.as_str() {
            return Err(ServiceError::InvalidOperation(
                "Order is not awaiting payment".to_string(),
            ));
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed.as_str()),
            )
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Processing.as_str()),
            )
            .col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(Some(transaction_ref.to_string())),
            )
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::PaymentPending.as_str()))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::OrderAlreadyPaid);
        }

        append_history(
            &*self.db,
            order_id,
            OrderStatus::Processing.as_str(),
            format!("Payment confirmed manually by {verified_by} (ref {transaction_ref})"),
        )
        .await?;

        self.inventory.commit_order_best_effort(order_id).await;

        let _ = self
            .event_sender
            .send(Event::PaymentCaptured {
                order_id,
                gateway_payment_id: transaction_ref.to_string(),
            })
            .await;

        let updated = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        notifications::notify_status_update(self.notifier.as_ref(), &updated).await;

        Ok(updated)
    }
}
