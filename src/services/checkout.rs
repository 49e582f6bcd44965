//! Checkout orchestrator.
//!
//! Turns a cart into a durable order: validates inputs, snapshots prices and
//! the shipping address, applies a coupon, opens a payment intent, and
//! reserves inventory. Compensation is forward-only: once the order row
//! exists, later failures (gateway, reservation) never roll it back; the
//! order is fixed forward via retry-payment or cancellation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::CheckoutConfig,
    entities::cart::{self, CartStatus, Entity as CartEntity},
    entities::cart_item::{self, Entity as CartItemEntity},
    entities::customer_address::{self, Entity as AddressEntity},
    entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    notifications::{self, NotificationChannel},
    services::{append_history, coupons::CouponService, inventory::InventoryService},
};

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub customer_id: Uuid,
    pub address_id: Uuid,
    /// "online" or "assisted".
    #[validate(length(min = 1))]
    pub payment_method: String,
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    coupons: CouponService,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationChannel>,
    event_sender: EventSender,
    settings: CheckoutConfig,
}

/// Shipping is free at or above the threshold.
pub fn compute_shipping_fee(settings: &CheckoutConfig, cart_total: Decimal) -> Decimal {
    if cart_total >= settings.free_shipping_threshold {
        Decimal::ZERO
    } else {
        settings.delivery_charge
    }
}

/// `final = max(0, total + shipping - discount)`.
pub fn compute_final_amount(total: Decimal, shipping: Decimal, discount: Decimal) -> Decimal {
    (total + shipping - discount).max(Decimal::ZERO)
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        coupons: CouponService,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationChannel>,
        event_sender: EventSender,
        settings: CheckoutConfig,
    ) -> Self {
        Self {
            db,
            inventory,
            coupons,
            gateway,
            notifier,
            event_sender,
            settings,
        }
    }

    /// Places an order from the customer's active cart.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        request.validate()?;

        let payment_method = PaymentMethod::parse(&request.payment_method).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Unknown payment method '{}'",
                request.payment_method
            ))
        })?;

        // 1. Load the cart; it must have items.
        let cart = CartEntity::find()
            .filter(cart::Column::CustomerId.eq(request.customer_id))
            .filter(cart::Column::Status.eq(CartStatus::Active.as_str()))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // 2. Load and snapshot the shipping address.
        let address = AddressEntity::find_by_id(request.address_id)
            .filter(customer_address::Column::CustomerId.eq(request.customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::AddressNotFound(request.address_id.to_string()))?;
        let address_snapshot = serde_json::to_string(&address)
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {e}")))?;

        // 3. Verify every line's variant exists with sufficient stock. This
        // is a fail-fast pre-check; the authoritative guard is the
        // conditional decrement at reservation time.
        for item in &items {
            let variant = item.variant_name.clone().unwrap_or_default();
            match self.inventory.available(item.product_id, &variant).await? {
                None => {
                    return Err(ServiceError::VariantNotFound(format!(
                        "{}/{variant}",
                        item.product_id
                    )))
                }
                Some(stock) if stock < item.quantity => {
                    return Err(ServiceError::InsufficientStock(format!(
                        "product {} variant '{variant}' (requested {}, available {stock})",
                        item.product_id, item.quantity
                    )))
                }
                Some(_) => {}
            }
        }

        // 4-7. Totals from snapshotted prices.
        let total_amount: Decimal = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let validated_coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(
                self.coupons
                    .validate(code, request.customer_id, total_amount, &items)
                    .await?,
            ),
            None => None,
        };
        let discount_amount = validated_coupon
            .as_ref()
            .map(|(_, d)| *d)
            .unwrap_or(Decimal::ZERO);

        let shipping_fee = compute_shipping_fee(&self.settings, total_amount);
        let final_amount = compute_final_amount(total_amount, shipping_fee, discount_amount);

        // 8. Payment window: short for gateway payments, long for assisted
        // flows that wait on human verification.
        let now = Utc::now();
        let payment_expires_at = match payment_method {
            PaymentMethod::Online => {
                now + Duration::minutes(self.settings.online_payment_window_mins)
            }
            PaymentMethod::Assisted => {
                now + Duration::hours(self.settings.assisted_payment_window_hours)
            }
        };

        // 9. Persist the order, its item snapshot, the opening history entry,
        // and the coupon redemption in one transaction.
        let order_id = Uuid::new_v4();
        let order_number = format!("ORD-{}", &order_id.to_string()[..8].to_uppercase());

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(request.customer_id),
            order_status: Set(OrderStatus::PaymentPending.as_str().to_string()),
            payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
            payment_method: Set(payment_method.as_str().to_string()),
            total_amount: Set(total_amount),
            shipping_fee: Set(shipping_fee),
            discount_amount: Set(discount_amount),
            final_amount: Set(final_amount),
            currency: Set(self.settings.currency.clone()),
            coupon_code: Set(validated_coupon.as_ref().map(|(c, _)| c.code.clone())),
            shipping_address: Set(address_snapshot),
            payment_expires_at: Set(payment_expires_at),
            gateway_intent_id: Set(None),
            gateway_payment_id: Set(None),
            gateway_signature: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for item in &items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                variant_name: Set(item.variant_name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        append_history(
            &txn,
            order_id,
            OrderStatus::PaymentPending.as_str(),
            "Order created; awaiting payment",
        )
        .await?;

        if let Some((coupon, _)) = &validated_coupon {
            self.coupons
                .redeem(&txn, coupon, request.customer_id, order_id)
                .await?;
        }

        txn.commit().await?;

        info!(order_number = %order_number, %final_amount, "order created");
        let _ = self.event_sender.send(Event::OrderCreated(order_id)).await;
        if let Some((coupon, _)) = &validated_coupon {
            let _ = self
                .event_sender
                .send(Event::CouponRedeemed {
                    code: coupon.code.clone(),
                    order_id,
                })
                .await;
        }

        // 10. Open a gateway intent for online payment. The order row already
        // exists; a gateway failure surfaces but is not rolled back.
        let order_model = if payment_method == PaymentMethod::Online {
            let amount_minor = to_minor_units(final_amount)?;
            let intent = self
                .gateway
                .create_intent(amount_minor, &self.settings.currency, &order_number)
                .await
                .map_err(|e| {
                    warn!(order_id = %order_id, error = %e, "payment intent creation failed");
                    ServiceError::PaymentInitiationFailed(e.to_string())
                })?;

            let mut active: order::ActiveModel = order_model.into();
            active.gateway_intent_id = Set(Some(intent.intent_id));
            active.updated_at = Set(Some(Utc::now()));
            active.update(&*self.db).await?
        } else {
            order_model
        };

        // 11. Reserve inventory. The order and intent already exist, so
        // reservation failures are logged rather than failing the checkout.
        for item in &items {
            let variant = item.variant_name.clone().unwrap_or_default();
            if let Err(e) = self
                .inventory
                .reserve(order_id, item.product_id, &variant, item.quantity)
                .await
            {
                warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    error = %e,
                    "inventory reservation failed after order creation"
                );
            }
        }

        // Cart is superseded by the order's own snapshot.
        let mut cart_active: cart::ActiveModel = cart.into();
        cart_active.status = Set(CartStatus::Converted.as_str().to_string());
        cart_active.updated_at = Set(Some(Utc::now()));
        cart_active.update(&*self.db).await?;

        // 12. Online orders are confirmed only after payment succeeds.
        if payment_method == PaymentMethod::Assisted {
            notifications::notify_order_confirmation(self.notifier.as_ref(), &order_model).await;
        }

        Ok(order_model)
    }
}

/// Converts a major-unit decimal amount to gateway minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {amount}")))
}
