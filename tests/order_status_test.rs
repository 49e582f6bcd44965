mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::{
    seed_address, seed_cart, seed_cart_item, seed_coupon, seed_customer, seed_inventory,
    CouponSeed, TestApp,
};
use storefront_api::{
    entities::{
        coupon::Entity as CouponEntity,
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_status_history::{self, Entity as HistoryEntity},
    },
    errors::ServiceError,
    gateway,
    services::{checkout::PlaceOrderRequest, payments::VerifyPaymentRequest},
};

async fn place_order(app: &TestApp, method: &str, coupon: Option<&str>) -> (order::Model, Uuid) {
    let customer_id = seed_customer(&app.db, Utc::now()).await;
    let address_id = seed_address(&app.db, customer_id).await;
    let product_id = Uuid::new_v4();
    seed_inventory(&app.db, product_id, "Default", 10).await;
    let cart_id = seed_cart(&app.db, customer_id).await;
    seed_cart_item(&app.db, cart_id, product_id, Some("Default"), 2, dec!(300)).await;

    let order = app
        .services()
        .checkout
        .place_order(PlaceOrderRequest {
            customer_id,
            address_id,
            payment_method: method.to_string(),
            coupon_code: coupon.map(|c| c.to_string()),
        })
        .await
        .unwrap();
    (order, product_id)
}

async fn pay_order(app: &TestApp, order: &order::Model) {
    let intent_id = order.gateway_intent_id.clone().unwrap();
    let signature = gateway::payment_signature(common::GATEWAY_SECRET, &intent_id, "pay_ok");
    app.services()
        .payments
        .verify_client_payment(VerifyPaymentRequest {
            order_id: order.id,
            gateway_intent_id: intent_id,
            gateway_payment_id: "pay_ok".to_string(),
            signature,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn paid_order_walks_the_fulfilment_chain() {
    let app = TestApp::new().await;
    let (order, _) = place_order(&app, "online", None).await;
    pay_order(&app, &order).await;

    let shipped = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Shipped, false, None)
        .await
        .unwrap();
    assert_eq!(shipped.order_status, OrderStatus::Shipped.as_str());

    let delivered = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Delivered, false, None)
        .await
        .unwrap();
    assert_eq!(delivered.order_status, OrderStatus::Delivered.as_str());

    // Each hop appended history.
    let history = HistoryEntity::find()
        .filter(order_status_history::Column::OrderId.eq(order.id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(history.len(), 4); // created, paid, shipped, delivered
}

#[tokio::test]
async fn unpaid_order_cannot_enter_processing() {
    let app = TestApp::new().await;
    let (order, _) = place_order(&app, "online", None).await;

    let err = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Processing, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::IllegalTransition(_)));
}

#[tokio::test]
async fn skipping_the_chain_is_rejected() {
    let app = TestApp::new().await;
    let (order, _) = place_order(&app, "online", None).await;
    pay_order(&app, &order).await;

    let err = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Delivered, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::IllegalTransition(_)));
}

#[tokio::test]
async fn terminal_states_require_the_override_flag() {
    let app = TestApp::new().await;
    let (order, _) = place_order(&app, "online", None).await;
    pay_order(&app, &order).await;
    for status in [OrderStatus::Shipped, OrderStatus::Delivered] {
        app.services()
            .order_status
            .update_status(order.id, status, false, None)
            .await
            .unwrap();
    }

    let err = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Shipped, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::IllegalTransition(_)));

    // Operator override can leave the terminal state.
    let reopened = app
        .services()
        .order_status
        .update_status(
            order.id,
            OrderStatus::Shipped,
            true,
            Some("Package returned by carrier".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(reopened.order_status, OrderStatus::Shipped.as_str());
}

#[tokio::test]
async fn cancelling_an_unpaid_order_releases_stock_and_coupon() {
    let app = TestApp::new().await;
    let coupon_id = seed_coupon(&app.db, CouponSeed::flat("CANCEL50", dec!(50))).await;
    let (order, product_id) = place_order(&app, "online", Some("CANCEL50")).await;

    let cancelled = app
        .services()
        .order_status
        .update_status(order.id, OrderStatus::Cancelled, false, None)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled.as_str());

    let stock = app
        .services()
        .inventory
        .available(product_id, "Default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock, 10);

    let coupon = CouponEntity::find_by_id(coupon_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 0);
}

#[tokio::test]
async fn cancelling_a_paid_order_keeps_coupon_usage() {
    let app = TestApp::new().await;
    let coupon_id = seed_coupon(&app.db, CouponSeed::flat("PAID50", dec!(50))).await;
    let (order, _) = place_order(&app, "online", Some("PAID50")).await;
    pay_order(&app, &order).await;

    app.services()
        .order_status
        .update_status(order.id, OrderStatus::Cancelled, false, None)
        .await
        .unwrap();

    // Quota was genuinely consumed by a completed purchase.
    let coupon = CouponEntity::find_by_id(coupon_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 1);
}

#[tokio::test]
async fn manual_confirmation_completes_an_assisted_order() {
    let app = TestApp::new().await;
    let (order, product_id) = place_order(&app, "assisted", None).await;

    let confirmed = app
        .services()
        .order_status
        .confirm_manual_payment(order.id, "ops@example.com", "TXN-4242")
        .await
        .unwrap();
    assert_eq!(confirmed.order_status, OrderStatus::Processing.as_str());
    assert_eq!(confirmed.payment_status, PaymentStatus::Completed.as_str());
    assert_eq!(confirmed.gateway_payment_id.as_deref(), Some("TXN-4242"));
    assert!(confirmed.paid_at.is_some());

    // Committed, not released.
    app.services().inventory.release_order(order.id).await.unwrap();
    let stock = app
        .services()
        .inventory
        .available(product_id, "Default")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock, 8);
}

#[tokio::test]
async fn manual_confirmation_is_refused_twice_and_for_online_orders() {
    let app = TestApp::new().await;
    let (assisted, _) = place_order(&app, "assisted", None).await;
    app.services()
        .order_status
        .confirm_manual_payment(assisted.id, "ops@example.com", "TXN-1")
        .await
        .unwrap();
    let err = app
        .services()
        .order_status
        .confirm_manual_payment(assisted.id, "ops@example.com", "TXN-2")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OrderAlreadyPaid));

    let (online, _) = place_order(&app, "online", None).await;
    let err = app
        .services()
        .order_status
        .confirm_manual_payment(online.id, "ops@example.com", "TXN-3")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}
