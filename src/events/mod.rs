use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the order lifecycle. Delivery is best-effort; nothing in
/// the request path depends on an event being observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderExpired(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentCaptured {
        order_id: Uuid,
        gateway_payment_id: String,
    },
    PaymentFailed(Uuid),
    PaymentIntentReissued {
        order_id: Uuid,
        gateway_intent_id: String,
    },
    InventoryReserved {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    InventoryReleased(Uuid),
    InventoryCommitted(Uuid),
    CouponRedeemed {
        code: String,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Drains the event channel, logging each event. Spawned from `main`.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "event");
    }
}
