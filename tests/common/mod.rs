#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::{
    app,
    config::AppConfig,
    db,
    entities::{cart, cart_item, coupon, customer, customer_address, inventory_level},
    errors::ServiceError,
    events::{self, EventSender},
    gateway::{PaymentGateway, PaymentIntent},
    handlers::AppServices,
    notifications::LogNotifier,
    services::{
        checkout::CheckoutService, coupons::CouponService, expiry::ExpiryService,
        inventory::InventoryService, order_status::OrderStatusService, payments::PaymentService,
    },
    AppState,
};

pub const GATEWAY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";

/// Gateway double. Counts intents and can be flipped into a failure mode.
pub struct FakeGateway {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn intent_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _receipt: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentInitiationFailed(
                "gateway unavailable".to_string(),
            ));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            intent_id: format!("intent_{n}"),
        })
    }
}

/// Test application backed by an in-memory SQLite database. A single pooled
/// connection keeps every query on the same in-memory instance.
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let pool = Database::connect(opts)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(LogNotifier);

        let inventory = InventoryService::new(db_arc.clone(), event_sender.clone());
        let coupons = CouponService::new(db_arc.clone());
        let expiry = ExpiryService::new(
            db_arc.clone(),
            inventory.clone(),
            coupons.clone(),
            notifier.clone(),
            event_sender.clone(),
        );
        let checkout = CheckoutService::new(
            db_arc.clone(),
            inventory.clone(),
            coupons.clone(),
            gateway.clone(),
            notifier.clone(),
            event_sender.clone(),
            cfg.checkout.clone(),
        );
        let payments = PaymentService::new(
            db_arc.clone(),
            inventory.clone(),
            gateway.clone(),
            notifier.clone(),
            event_sender.clone(),
            expiry.clone(),
            GATEWAY_SECRET.to_string(),
            WEBHOOK_SECRET.to_string(),
        );
        let order_status = OrderStatusService::new(
            db_arc.clone(),
            inventory.clone(),
            coupons.clone(),
            notifier.clone(),
            event_sender.clone(),
        );

        let state = AppState {
            db: db_arc.clone(),
            config: cfg,
            event_sender,
            services: AppServices {
                checkout,
                inventory,
                coupons,
                payments,
                order_status,
                expiry,
            },
        };

        Self {
            state,
            db: db_arc,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn router(&self) -> Router {
        app(self.state.clone())
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }
}

/// Signs a webhook body the way the gateway does.
pub fn sign_webhook(body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    let mut mac = <Hmac<sha2::Sha256> as Mac>::new_from_slice(WEBHOOK_SECRET.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub async fn seed_customer(db: &DatabaseConnection, registered_at: DateTime<Utc>) -> Uuid {
    let id = Uuid::new_v4();
    customer::ActiveModel {
        id: Set(id),
        email: Set(format!("{id}@example.com")),
        name: Set("Test Customer".to_string()),
        created_at: Set(registered_at),
    }
    .insert(db)
    .await
    .expect("seed customer");
    id
}

pub async fn seed_address(db: &DatabaseConnection, customer_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    customer_address::ActiveModel {
        id: Set(id),
        customer_id: Set(customer_id),
        line1: Set("42 Test Lane".to_string()),
        line2: Set(None),
        city: Set("Bengaluru".to_string()),
        state: Set("KA".to_string()),
        postal_code: Set("560001".to_string()),
        country: Set("IN".to_string()),
        phone: Set(Some("9999999999".to_string())),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed address");
    id
}

pub async fn seed_inventory(
    db: &DatabaseConnection,
    product_id: Uuid,
    variant_name: &str,
    stock: i32,
) {
    inventory_level::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        variant_name: Set(variant_name.to_string()),
        stock: Set(stock),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed inventory");
}

pub async fn seed_cart(db: &DatabaseConnection, customer_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    cart::ActiveModel {
        id: Set(id),
        customer_id: Set(customer_id),
        status: Set(cart::CartStatus::Active.as_str().to_string()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed cart");
    id
}

pub async fn seed_cart_item(
    db: &DatabaseConnection,
    cart_id: Uuid,
    product_id: Uuid,
    variant_name: Option<&str>,
    quantity: i32,
    unit_price: Decimal,
) {
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(product_id),
        variant_name: Set(variant_name.map(|v| v.to_string())),
        quantity: Set(quantity),
        unit_price: Set(unit_price),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed cart item");
}

pub struct CouponSeed {
    pub code: String,
    pub discount_type: coupon::DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: i32,
    pub user_limit: i32,
    pub coupon_type: coupon::CouponType,
    pub user_ids: Option<Vec<Uuid>>,
    pub product_ids: Option<Vec<Uuid>>,
    pub registered_after: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl CouponSeed {
    pub fn flat(code: &str, value: Decimal) -> Self {
        Self {
            code: code.to_string(),
            discount_type: coupon::DiscountType::Fixed,
            discount_value: value,
            min_order_amount: Decimal::ZERO,
            max_discount_amount: None,
            usage_limit: 0,
            user_limit: 1,
            coupon_type: coupon::CouponType::All,
            user_ids: None,
            product_ids: None,
            registered_after: None,
            is_active: true,
        }
    }

    pub fn percentage(code: &str, value: Decimal, cap: Option<Decimal>) -> Self {
        Self {
            discount_type: coupon::DiscountType::Percentage,
            max_discount_amount: cap,
            ..Self::flat(code, value)
        }
    }
}

pub async fn seed_coupon(db: &DatabaseConnection, seed: CouponSeed) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(id),
        code: Set(seed.code.to_uppercase()),
        discount_type: Set(seed.discount_type.as_str().to_string()),
        discount_value: Set(seed.discount_value),
        min_order_amount: Set(seed.min_order_amount),
        max_discount_amount: Set(seed.max_discount_amount),
        start_date: Set(now - chrono::Duration::days(1)),
        end_date: Set(now + chrono::Duration::days(30)),
        usage_limit: Set(seed.usage_limit),
        usage_count: Set(0),
        user_limit: Set(seed.user_limit),
        coupon_type: Set(seed.coupon_type.as_str().to_string()),
        user_ids: Set(seed
            .user_ids
            .map(|ids| serde_json::json!(ids.iter().map(|u| u.to_string()).collect::<Vec<_>>()))),
        product_ids: Set(seed
            .product_ids
            .map(|ids| serde_json::json!(ids.iter().map(|u| u.to_string()).collect::<Vec<_>>()))),
        registered_after: Set(seed.registered_after),
        is_active: Set(seed.is_active),
        created_at: Set(now),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed coupon");
    id
}
