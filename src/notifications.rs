//! Outbound notification channel.
//!
//! Transactional email/WhatsApp delivery is an external collaborator. The
//! lifecycle only ever invokes it fire-and-forget: a status change must never
//! fail because a notification channel is down.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::entities::order;
use crate::errors::ServiceError;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_order_confirmation(&self, order: &order::Model) -> Result<(), ServiceError>;

    async fn send_order_status_update(&self, order: &order::Model) -> Result<(), ServiceError>;
}

/// Default channel: logs the notification. Real transports implement the same
/// trait and are injected in `main`.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send_order_confirmation(&self, order: &order::Model) -> Result<(), ServiceError> {
        info!(order_number = %order.order_number, "order confirmation notification");
        Ok(())
    }

    async fn send_order_status_update(&self, order: &order::Model) -> Result<(), ServiceError> {
        info!(
            order_number = %order.order_number,
            status = %order.order_status,
            "order status notification"
        );
        Ok(())
    }
}

/// Helper used by services: awaits the send and swallows any failure.
pub async fn notify_status_update(channel: &dyn NotificationChannel, order: &order::Model) {
    if let Err(e) = channel.send_order_status_update(order).await {
        warn!(order_id = %order.id, error = %e, "status notification failed; ignoring");
    }
}

pub async fn notify_order_confirmation(channel: &dyn NotificationChannel, order: &order::Model) {
    if let Err(e) = channel.send_order_confirmation(order).await {
        warn!(order_id = %order.id, error = %e, "confirmation notification failed; ignoring");
    }
}
