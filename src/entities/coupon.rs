use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(DiscountType::Percentage),
            "fixed" => Some(DiscountType::Fixed),
            _ => None,
        }
    }
}

/// Who a coupon targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponType {
    All,
    NewUsers,
    SpecificUsers,
    SpecificProducts,
    RegisteredAfter,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::All => "all",
            CouponType::NewUsers => "new_users",
            CouponType::SpecificUsers => "specific_users",
            CouponType::SpecificProducts => "specific_products",
            CouponType::RegisteredAfter => "registered_after",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(CouponType::All),
            "new_users" => Some(CouponType::NewUsers),
            "specific_users" => Some(CouponType::SpecificUsers),
            "specific_products" => Some(CouponType::SpecificProducts),
            "registered_after" => Some(CouponType::RegisteredAfter),
            _ => None,
        }
    }
}

/// Coupon definition. `usage_count` only ever increases, and only once an
/// order referencing the coupon is durably created (compensated back down if
/// that order is cancelled before payment).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Unique, stored uppercased.
    pub code: String,
    pub discount_type: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_order_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub max_discount_amount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// 0 means unlimited.
    pub usage_limit: i32,
    pub usage_count: i32,
    /// Per-user redemption cap.
    pub user_limit: i32,
    pub coupon_type: String,
    /// Targeting data for `specific_users`: JSON array of customer ids.
    #[sea_orm(column_type = "Json", nullable)]
    pub user_ids: Option<Json>,
    /// Targeting data for `specific_products`: JSON array of product ids.
    #[sea_orm(column_type = "Json", nullable)]
    pub product_ids: Option<Json>,
    #[sea_orm(nullable)]
    pub registered_after: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
