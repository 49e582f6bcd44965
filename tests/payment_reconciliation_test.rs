mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::{
    seed_address, seed_cart, seed_cart_item, seed_customer, seed_inventory, sign_webhook, TestApp,
};
use storefront_api::{
    entities::{
        inventory_reservation::{self, Entity as ReservationEntity, ReservationStatus},
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    },
    errors::ServiceError,
    gateway,
    services::{checkout::PlaceOrderRequest, payments::VerifyPaymentRequest},
};

async fn place_online_order(app: &TestApp) -> (order::Model, Uuid) {
    let customer_id = seed_customer(&app.db, Utc::now()).await;
    let address_id = seed_address(&app.db, customer_id).await;
    let product_id = Uuid::new_v4();
    seed_inventory(&app.db, product_id, "Default", 10).await;
    let cart_id = seed_cart(&app.db, customer_id).await;
    seed_cart_item(&app.db, cart_id, product_id, Some("Default"), 2, dec!(250)).await;

    let order = app
        .services()
        .checkout
        .place_order(PlaceOrderRequest {
            customer_id,
            address_id,
            payment_method: "online".to_string(),
            coupon_code: None,
        })
        .await
        .unwrap();
    (order, product_id)
}

#[tokio::test]
async fn valid_client_verification_completes_the_order() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    let signature = gateway::payment_signature(common::GATEWAY_SECRET, &intent_id, "pay_001");
    let updated = app
        .services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_001".to_string(),
            signature,
        })
        .await
        .unwrap();

    assert_eq!(updated.order_status, OrderStatus::Processing.as_str());
    assert_eq!(updated.payment_status, PaymentStatus::Completed.as_str());
    assert_eq!(updated.gateway_payment_id.as_deref(), Some("pay_001"));
    assert!(updated.paid_at.is_some());

    // The reservation survives the payment as a committed ledger row.
    let rows = ReservationEntity::find()
        .filter(inventory_reservation::Column::OrderId.eq(order.id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(rows[0].status, ReservationStatus::Committed.as_str());
}

#[tokio::test]
async fn tampered_signature_marks_payment_failed() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    let err = app
        .services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_001".to_string(),
            signature: "deadbeef".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentVerificationFailed));

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed.as_str());
    assert_eq!(stored.order_status, OrderStatus::PaymentPending.as_str());
}

#[tokio::test]
async fn mismatched_intent_is_rejected_even_with_a_valid_signature() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;

    let signature = gateway::payment_signature(common::GATEWAY_SECRET, "intent_other", "pay_001");
    let err = app
        .services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: "intent_other".to_string(),
            gateway_payment_id: "pay_001".to_string(),
            signature,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentVerificationFailed));
}

#[tokio::test]
async fn webhook_capture_is_idempotent_across_redeliveries() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    let body = serde_json::json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {"id": "pay_777", "order_id": intent_id}}}
    })
    .to_string();
    let signature = sign_webhook(body.as_bytes());

    for _ in 0..3 {
        app.services()
            .payments
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap();
    }

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed.as_str());
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_777"));

    // Exactly one completion history entry despite three deliveries.
    use storefront_api::entities::order_status_history::{self, Entity as HistoryEntity};
    let completions = HistoryEntity::find()
        .filter(order_status_history::Column::OrderId.eq(order.id))
        .filter(order_status_history::Column::Status.eq(OrderStatus::Processing.as_str()))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(completions.len(), 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_dropped() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    let body = serde_json::json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {"id": "pay_778", "order_id": intent_id}}}
    })
    .to_string();

    app.services()
        .payments
        .handle_webhook(body.as_bytes(), Some("not-a-signature"))
        .await
        .unwrap();
    app.services()
        .payments
        .handle_webhook(body.as_bytes(), None)
        .await
        .unwrap();

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending.as_str());
}

#[tokio::test]
async fn webhook_failure_event_marks_payment_failed() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    let body = serde_json::json!({
        "event": "payment.failed",
        "payload": {"payment": {"entity": {"id": "pay_779", "order_id": intent_id}}}
    })
    .to_string();
    let signature = sign_webhook(body.as_bytes());

    app.services()
        .payments
        .handle_webhook(body.as_bytes(), Some(&signature))
        .await
        .unwrap();

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed.as_str());
    // A failed payment can still be retried while the window is open.
    assert_eq!(stored.order_status, OrderStatus::PaymentPending.as_str());
}

#[tokio::test]
async fn retry_payment_reissues_the_intent() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    assert_eq!(order.gateway_intent_id.as_deref(), Some("intent_1"));

    let updated = app.services().payments.retry_payment(order.id).await.unwrap();
    assert_eq!(updated.gateway_intent_id.as_deref(), Some("intent_2"));
    assert_eq!(app.gateway.intent_count(), 2);
}

#[tokio::test]
async fn retry_is_refused_for_paid_orders() {
    let app = TestApp::new().await;
    let (order, _) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();
    let signature = gateway::payment_signature(common::GATEWAY_SECRET, &intent_id, "pay_001");
    app.services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_001".to_string(),
            signature,
        })
        .await
        .unwrap();

    let err = app.services().payments.retry_payment(order.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::OrderAlreadyPaid));
}

#[tokio::test]
async fn valid_proof_for_an_expired_order_is_refused() {
    let app = TestApp::new().await;
    let (order, product_id) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();

    OrderEntity::update_many()
        .col_expr(
            order::Column::PaymentExpiresAt,
            Expr::value(Utc::now() - Duration::minutes(1)),
        )
        .filter(order::Column::Id.eq(order.id))
        .exec(&*app.db)
        .await
        .unwrap();
    assert_eq!(app.services().expiry.sweep().await.unwrap(), 1);

    let signature = gateway::payment_signature(common::GATEWAY_SECRET, &intent_id, "pay_late");
    let err = app
        .services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_late".to_string(),
            signature,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OrderExpired));

    // The cancellation stands and the released stock is not re-taken.
    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, OrderStatus::Cancelled.as_str());
    assert_eq!(stored.payment_status, PaymentStatus::Expired.as_str());
    let stock = app
        .services()
        .inventory
        .available(product_id, "Default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock, 10);
}

#[tokio::test]
async fn completed_payment_cannot_be_expired() {
    let app = TestApp::new().await;
    let (order, product_id) = place_online_order(&app).await;
    let intent_id = order.gateway_intent_id.clone().unwrap();
    let signature = gateway::payment_signature(common::GATEWAY_SECRET, &intent_id, "pay_001");
    app.services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_001".to_string(),
            signature,
        })
        .await
        .unwrap();

    let stored = OrderEntity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    let expired = app.services().expiry.expire(&stored).await.unwrap();
    assert!(!expired);

    // Stock stays committed to the paid order.
    let stock = app
        .services()
        .inventory
        .available(product_id, "Default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock, 8);
}
