//! Coupon engine.
//!
//! Validation is stateless and never consumes quota: `usage_count` moves only
//! through [`CouponService::redeem`], called once the order row durably
//! exists, and back through [`CouponService::compensate`] when an order is
//! cancelled before payment.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::cart_item,
    entities::coupon::{self, CouponType, DiscountType, Entity as CouponEntity},
    entities::coupon_redemption::{self, Entity as RedemptionEntity},
    entities::customer::Entity as CustomerEntity,
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
};

/// Discount for a validated coupon against a discount base. Percentage
/// discounts are capped by `max_discount`; fixed discounts never exceed the
/// base. The result is rounded to the currency's minor unit.
pub fn compute_discount(
    discount_type: DiscountType,
    value: Decimal,
    max_discount: Option<Decimal>,
    base: Decimal,
) -> Decimal {
    let raw = match discount_type {
        DiscountType::Percentage => {
            let pct = base * value / Decimal::from(100);
            match max_discount {
                Some(max) => pct.min(max),
                None => pct,
            }
        }
        DiscountType::Fixed => value.min(base),
    };
    raw.max(Decimal::ZERO).round_dp(2)
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validates a coupon for a customer's cart and returns the coupon with
    /// the computed discount. Short-circuits on the first failing rule; every
    /// failure carries its own user-facing message.
    #[instrument(skip(self, items), fields(code, customer_id = %customer_id))]
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Uuid,
        cart_total: Decimal,
        items: &[cart_item::Model],
    ) -> Result<(coupon::Model, Decimal), ServiceError> {
        let normalized = code.trim().to_uppercase();

        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::CouponInvalid("Coupon code not found".to_string()))?;

        if !coupon.is_active {
            return Err(ServiceError::CouponInvalid(
                "Coupon is not active".to_string(),
            ));
        }

        let now = Utc::now();
        if now < coupon.start_date {
            return Err(ServiceError::CouponInvalid(
                "Coupon is not yet valid".to_string(),
            ));
        }
        if now > coupon.end_date {
            return Err(ServiceError::CouponInvalid("Coupon has expired".to_string()));
        }

        if coupon.usage_limit > 0 && coupon.usage_count >= coupon.usage_limit {
            return Err(ServiceError::CouponInvalid(
                "Coupon has been fully redeemed".to_string(),
            ));
        }

        if cart_total < coupon.min_order_amount {
            return Err(ServiceError::CouponInvalid(format!(
                "Order total must be at least {} to use this coupon",
                coupon.min_order_amount
            )));
        }

        if coupon.user_limit > 0 {
            let used = RedemptionEntity::find()
                .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
                .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
                .count(&*self.db)
                .await?;
            if used >= coupon.user_limit as u64 {
                return Err(ServiceError::CouponInvalid(
                    "Coupon usage limit reached for this account".to_string(),
                ));
            }
        }

        let coupon_type = CouponType::parse(&coupon.coupon_type).ok_or_else(|| {
            ServiceError::InternalError(format!("unknown coupon type '{}'", coupon.coupon_type))
        })?;

        // Targeting; `specific_products` also restricts the discount base to
        // the matching line items.
        let mut base = cart_total;
        match coupon_type {
            CouponType::All => {}
            CouponType::NewUsers => {
                let prior = OrderEntity::find()
                    .filter(order::Column::CustomerId.eq(customer_id))
                    .count(&*self.db)
                    .await?;
                if prior > 0 {
                    return Err(ServiceError::CouponInvalid(
                        "Coupon is for new customers only".to_string(),
                    ));
                }
            }
            CouponType::RegisteredAfter => {
                let cutoff = coupon.registered_after.ok_or_else(|| {
                    ServiceError::InternalError(
                        "registered_after coupon without cutoff date".to_string(),
                    )
                })?;
                let customer = CustomerEntity::find_by_id(customer_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Customer {customer_id} not found"))
                    })?;
                if customer.created_at < cutoff {
                    return Err(ServiceError::CouponInvalid(
                        "Coupon is limited to recently registered customers".to_string(),
                    ));
                }
            }
            CouponType::SpecificUsers => {
                let allowed = parse_uuid_list(coupon.user_ids.as_ref());
                if !allowed.contains(&customer_id) {
                    return Err(ServiceError::CouponInvalid(
                        "Coupon is not available for this account".to_string(),
                    ));
                }
            }
            CouponType::SpecificProducts => {
                let products = parse_uuid_list(coupon.product_ids.as_ref());
                let matching: Decimal = items
                    .iter()
                    .filter(|item| products.contains(&item.product_id))
                    .map(|item| item.unit_price * Decimal::from(item.quantity))
                    .sum();
                if matching.is_zero() {
                    return Err(ServiceError::CouponInvalid(
                        "Coupon does not apply to items in the cart".to_string(),
                    ));
                }
                base = matching;
            }
        }

        let discount_type = DiscountType::parse(&coupon.discount_type).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "unknown discount type '{}'",
                coupon.discount_type
            ))
        })?;

        let discount = compute_discount(
            discount_type,
            coupon.discount_value,
            coupon.max_discount_amount,
            base,
        );
        debug!(code = %normalized, %discount, "coupon validated");

        Ok((coupon, discount))
    }

    /// Consumes one use of the coupon and records the redemption. The
    /// increment is guarded by `usage_count < usage_limit`, so the global cap
    /// holds even when two orders redeem concurrently.
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon: &coupon::Model,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let guard = Condition::any()
            .add(coupon::Column::UsageLimit.eq(0))
            .add(Expr::col(coupon::Column::UsageCount).lt(Expr::col(coupon::Column::UsageLimit)));

        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(guard)
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CouponInvalid(
                "Coupon has been fully redeemed".to_string(),
            ));
        }

        let redemption = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        };
        redemption.insert(conn).await?;
        Ok(())
    }

    /// Returns coupon quota consumed by an order that was cancelled before
    /// payment completed. Safe to call for orders without a coupon.
    #[instrument(skip(self), fields(order_id = %order.id))]
    pub async fn compensate(&self, order: &order::Model) -> Result<(), ServiceError> {
        let Some(code) = order.coupon_code.as_deref() else {
            return Ok(());
        };

        let Some(coupon) = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
        else {
            warn!(code, "coupon missing during compensation");
            return Ok(());
        };

        let deleted = RedemptionEntity::delete_many()
            .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
            .filter(coupon_redemption::Column::OrderId.eq(order.id))
            .exec(&*self.db)
            .await?;

        if deleted.rows_affected > 0 {
            CouponEntity::update_many()
                .col_expr(
                    coupon::Column::UsageCount,
                    Expr::col(coupon::Column::UsageCount).sub(deleted.rows_affected as i32),
                )
                .col_expr(coupon::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(coupon::Column::Id.eq(coupon.id))
                .filter(coupon::Column::UsageCount.gt(0))
                .exec(&*self.db)
                .await?;
        }
        Ok(())
    }
}

fn parse_uuid_list(value: Option<&serde_json::Value>) -> Vec<Uuid> {
    value
        .and_then(|v| serde_json::from_value::<Vec<Uuid>>(v.clone()).ok())
        .unwrap_or_default()
}
