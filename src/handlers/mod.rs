pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;

use crate::services::{
    checkout::CheckoutService, coupons::CouponService, expiry::ExpiryService,
    inventory::InventoryService, order_status::OrderStatusService, payments::PaymentService,
};

/// Service bundle shared across handlers through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: CheckoutService,
    pub inventory: InventoryService,
    pub coupons: CouponService,
    pub payments: PaymentService,
    pub order_status: OrderStatusService,
    pub expiry: ExpiryService,
}
