//! Payment reconciliation.
//!
//! Client-submitted verification and the gateway webhook both converge on
//! [`PaymentService::process_payment_success`], whose compare-and-swap on the
//! payment status makes confirmation idempotent: webhook redelivery and a
//! race between the two paths resolve to exactly one completion.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use sea_orm::ActiveModelTrait;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{self, PaymentGateway},
    notifications::{self, NotificationChannel},
    services::{append_history, checkout::to_minor_units, expiry::ExpiryService,
        inventory::InventoryService},
};

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub gateway_intent_id: String,
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// Webhook payload shape as delivered by the gateway.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: WebhookPayment,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    entity: WebhookPaymentEntity,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentEntity {
    /// Gateway payment id.
    id: String,
    /// Gateway intent id the payment settles.
    order_id: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    gateway_client: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationChannel>,
    event_sender: EventSender,
    expiry: ExpiryService,
    gateway_secret: String,
    webhook_secret: String,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        gateway_client: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationChannel>,
        event_sender: EventSender,
        expiry: ExpiryService,
        gateway_secret: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            db,
            inventory,
            gateway_client,
            notifier,
            event_sender,
            expiry,
            gateway_secret,
            webhook_secret,
        }
    }

    /// Verifies a client-submitted payment proof and completes the order.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn verify_client_payment(
        &self,
        request: VerifyPaymentRequest,
    ) -> Result<order::Model, ServiceError> {
        request.validate()?;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", request.order_id))
            })?;

        if order.payment_status == PaymentStatus::Completed.as_str() {
            return Err(ServiceError::OrderAlreadyPaid);
        }

        let intent_matches = order
            .gateway_intent_id
            .as_deref()
            .map(|stored| stored == request.gateway_intent_id)
            .unwrap_or(false);
        let signature_valid = gateway::verify_payment_signature(
            &self.gateway_secret,
            &request.gateway_intent_id,
            &request.gateway_payment_id,
            &request.signature,
        );

        if !intent_matches || !signature_valid {
            self.mark_payment_failed(order.id, "Payment verification failed")
                .await?;
            return Err(ServiceError::PaymentVerificationFailed);
        }

        let completed = self
            .process_payment_success(
                order.id,
                &request.gateway_payment_id,
                Some(&request.signature),
            )
            .await?;

        let order = OrderEntity::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;

        if !completed {
            // Valid proof but the guarded update lost: the order was settled
            // or expired out from under us between the read and the write.
            if order.payment_status == PaymentStatus::Completed.as_str() {
                return Err(ServiceError::OrderAlreadyPaid);
            }
            return Err(ServiceError::OrderExpired);
        }

        Ok(order)
    }

    /// Handles a raw gateway webhook delivery. Signature mismatches are
    /// logged and dropped; the HTTP layer answers 200 either way so a secret
    /// misconfiguration does not cause a retry storm.
    #[instrument(skip(self, body, signature))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), ServiceError> {
        let Some(signature) = signature else {
            warn!("webhook delivered without signature header; dropping");
            return Ok(());
        };
        if !gateway::verify_webhook_signature(&self.webhook_secret, body, signature) {
            warn!("webhook signature verification failed; dropping");
            return Ok(());
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "unparseable webhook payload; dropping");
                return Ok(());
            }
        };

        let entity = &envelope.payload.payment.entity;
        match envelope.event.as_str() {
            "payment.captured" => {
                let Some(order) = self.find_by_intent(&entity.order_id).await? else {
                    warn!(intent_id = %entity.order_id, "webhook for unknown intent; dropping");
                    return Ok(());
                };
                let completed = self
                    .process_payment_success(order.id, &entity.id, None)
                    .await?;
                if !completed {
                    info!(order_id = %order.id, "duplicate capture delivery; no-op");
                }
            }
            "payment.failed" => {
                if let Some(order) = self.find_by_intent(&entity.order_id).await? {
                    self.mark_payment_failed(order.id, "Gateway reported payment failure")
                        .await?;
                }
            }
            other => {
                info!(event = other, "unhandled webhook event");
            }
        }
        Ok(())
    }

    /// Completes an order's payment exactly once. The guarded update only
    /// succeeds while the order is still awaiting payment, so redelivered
    /// webhooks, racing verification calls, and late confirmations of
    /// already-expired orders all collapse to a no-op. Returns whether this
    /// call performed the completion.
    #[instrument(skip(self, signature), fields(order_id = %order_id))]
    pub async fn process_payment_success(
        &self,
        order_id: Uuid,
        gateway_payment_id: &str,
        signature: Option<&str>,
    ) -> Result<bool, ServiceError> {
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
                Expr::value(Some(gateway_payment_id.to_string())),
            )
            .col_expr(
                order::Column::GatewaySignature,
                Expr::value(signature.map(|s| s.to_string())),
            )
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::PaymentPending.as_str()))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        append_history(
            &*self.db,
            order_id,
            OrderStatus::Processing.as_str(),
            "Payment completed; order moved to processing",
        )
        .await?;

        self.inventory.commit_order_best_effort(order_id).await;

        info!(order_id = %order_id, gateway_payment_id, "payment captured");
        let _ = self
            .event_sender
            .send(Event::PaymentCaptured {
                order_id,
                gateway_payment_id: gateway_payment_id.to_string(),
            })
            .await;

        if let Some(updated) = OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            notifications::notify_status_update(self.notifier.as_ref(), &updated).await;
        }

        Ok(true)
    }

    /// Opens a fresh gateway intent for an order still awaiting payment. The
    /// previous intent is abandoned. An expired order is cancelled instead.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn retry_payment(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.payment_status == PaymentStatus::Completed.as_str() {
            return Err(ServiceError::OrderAlreadyPaid);
        }
        if order.payment_method != PaymentMethod::Online.as_str() {
            return Err(ServiceError::InvalidOperation(
                "Retry payment applies to online payment orders only".to_string(),
            ));
        }
        if order.is_payment_expired(Utc::now()) {
            self.expiry.expire(&order).await?;
            return Err(ServiceError::OrderExpired);
        }
        if order.order_status != OrderStatus::PaymentPending.as_str() {
            return Err(ServiceError::InvalidOperation(
                "Order is not awaiting payment".to_string(),
            ));
        }

        let amount_minor = to_minor_units(order.final_amount)?;
        let intent = self
            .gateway_client
            .create_intent(amount_minor, &order.currency, &order.order_number)
            .await
            .map_err(|e| ServiceError::PaymentInitiationFailed(e.to_string()))?;

        let intent_id = intent.intent_id.clone();
        let mut active: order::ActiveModel = order.into();
        active.gateway_intent_id = Set(Some(intent.intent_id));
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        append_history(
            &*self.db,
            order_id,
            OrderStatus::PaymentPending.as_str(),
            "Payment intent reissued",
        )
        .await?;

        let _ = self
            .event_sender
            .send(Event::PaymentIntentReissued {
                order_id,
                gateway_intent_id: intent_id,
            })
            .await;

        Ok(updated)
    }

    /// Marks payment failed while the order is still pending. Losing the
    /// guard (already failed, completed, or expired) is a no-op.
    async fn mark_payment_failed(
        &self,
        order_id: Uuid,
        message: &str,
    ) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            append_history(
                &*self.db,
                order_id,
                OrderStatus::PaymentPending.as_str(),
                message,
            )
            .await?;
            let _ = self.event_sender.send(Event::PaymentFailed(order_id)).await;
        }
        Ok(())
    }

    async fn find_by_intent(&self, intent_id: &str) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::GatewayIntentId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }
}
