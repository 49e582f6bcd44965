//! Expiry reconciler.
//!
//! An order whose payment window elapses without confirmation is cancelled
//! and its reserved stock restored. The scheduled sweep is the authoritative
//! mechanism; the per-read [`ExpiryService::reconcile`] check is a
//! non-authoritative fast path so a just-fetched order is never shown as
//! still payable. Both converge on a single guarded claim, so concurrent
//! observers expire an order exactly once.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::{
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{self, NotificationChannel},
    services::{append_history, coupons::CouponService, inventory::InventoryService},
};

#[derive(Clone)]
pub struct ExpiryService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    coupons: CouponService,
    notifier: Arc<dyn NotificationChannel>,
    event_sender: EventSender,
}

impl ExpiryService {
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

    /// Attempts to expire an order. The transition
    /// `payment_pending -> cancelled/expired` is claimed with a guarded
    /// update; only the claimant releases inventory, compensates the coupon,
    /// and appends history. Returns whether this call won the claim.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn expire(&self, order: &order::Model) -> Result<bool, ServiceError> {
        let claimed = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Cancelled.as_str()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Expired.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::PaymentPending.as_str()))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed.as_str()))
            .exec(&*self.db)
            .await?;

        if claimed.rows_affected == 0 {
            return Ok(false);
        }

        append_history(
            &*self.db,
            order.id,
            OrderStatus::Cancelled.as_str(),
            "Payment window elapsed; order cancelled automatically",
        )
        .await?;

        self.inventory.release_order_best_effort(order.id).await;

        if let Err(e) = self.coupons.compensate(order).await {
            warn!(order_id = %order.id, error = %e, "coupon compensation failed on expiry");
        }

        info!(order_number = %order.order_number, "order expired");
        let _ = self.event_sender.send(Event::OrderExpired(order.id)).await;

        if let Some(updated) = OrderEntity::find_by_id(order.id).one(&*self.db).await? {
            notifications::notify_status_update(self.notifier.as_ref(), &updated).await;
        }

        Ok(true)
    }

    /// Fast path run on every order read: returns the order, expiring it
    /// first when its payment window has passed.
    pub async fn reconcile(&self, order: order::Model) -> Result<order::Model, ServiceError> {
        if !order.is_payment_expired(Utc::now()) {
            return Ok(order);
        }

        self.expire(&order).await?;

        // Reload regardless of who won the claim; the stored state is
        // authoritative either way.
        OrderEntity::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))
    }

    /// Authoritative pass over all orders whose window elapsed. Returns the
    /// number of orders this sweep expired.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let stale = OrderEntity::find()
            .filter(order::Column::OrderStatus.eq(OrderStatus::PaymentPending.as_str()))
            .filter(order::Column::PaymentExpiresAt.lt(now))
            .all(&*self.db)
            .await?;

        let mut expired = 0u64;
        for order in stale {
            match self.expire(&order).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "failed to expire order in sweep")
                }
            }
        }

        if expired > 0 {
            info!(expired, "expiry sweep completed");
        }
        Ok(expired)
    }
}

/// Spawns the periodic expiry sweep.
pub fn spawn_sweeper(service: ExpiryService, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = service.sweep().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    })
}
