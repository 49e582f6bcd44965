//! SeaORM entities for the order lifecycle core.

pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_redemption;
pub mod customer;
pub mod customer_address;
pub mod inventory_level;
pub mod inventory_reservation;
pub mod order;
pub mod order_item;
pub mod order_status_history;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use coupon_redemption::Entity as CouponRedemption;
pub use customer::Entity as Customer;
pub use customer_address::Entity as CustomerAddress;
pub use inventory_level::Entity as InventoryLevel;
pub use inventory_reservation::Entity as InventoryReservation;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use order_status_history::Entity as OrderStatusHistory;
