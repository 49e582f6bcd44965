//! Inventory ledger.
//!
//! Stock is decremented at reservation time (there is no separate reserved
//! counter); each reservation is recorded in a ledger row keyed by order and
//! line item. Commit and release resolve ledger rows with guarded updates,
//! which makes both idempotent: a row flips out of `reserved` exactly once.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::inventory_level::{self, Entity as InventoryLevelEntity},
    entities::inventory_reservation::{self, Entity as ReservationEntity, ReservationStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Available stock for a variant, or `None` if the variant is unknown.
    #[instrument(skip(self))]
    pub async fn available(
        &self,
        product_id: Uuid,
        variant_name: &str,
    ) -> Result<Option<i32>, ServiceError> {
        let level = InventoryLevelEntity::find()
            .filter(inventory_level::Column::ProductId.eq(product_id))
            .filter(inventory_level::Column::VariantName.eq(variant_name))
            .one(&*self.db)
            .await?;
        Ok(level.map(|l| l.stock))
    }

    /// Reserves `quantity` units for an order line.
    ///
    /// The decrement is a single conditional update (`stock = stock - qty
    /// WHERE stock >= qty`), so concurrent checkouts racing for the last unit
    /// cannot drive stock negative; the loser gets `InsufficientStock`.
    #[instrument(skip(self), fields(order_id = %order_id, product_id = %product_id))]
    pub async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        variant_name: &str,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let result = InventoryLevelEntity::update_many()
            .col_expr(
                inventory_level::Column::Stock,
                Expr::col(inventory_level::Column::Stock).sub(quantity),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_level::Column::ProductId.eq(product_id))
            .filter(inventory_level::Column::VariantName.eq(variant_name))
            .filter(inventory_level::Column::Stock.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish an unknown variant from plain shortage.
            return match self.available(product_id, variant_name).await? {
                None => Err(ServiceError::VariantNotFound(format!(
                    "{product_id}/{variant_name}"
                ))),
                Some(stock) => Err(ServiceError::InsufficientStock(format!(
                    "product {product_id} variant '{variant_name}' (requested {quantity}, available {stock})"
                ))),
            };
        }

        let reservation = inventory_reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product_id),
            variant_name: Set(variant_name.to_string()),
            quantity: Set(quantity),
            status: Set(ReservationStatus::Reserved.as_str().to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        reservation.insert(&*self.db).await?;

        let _ = self
            .event_sender
            .send(Event::InventoryReserved {
                order_id,
                product_id,
                quantity,
            })
            .await;

        Ok(())
    }

    /// Marks all of an order's reservations as permanently consumed. Stock
    /// was already decremented at reservation time, so this is pure ledger
    /// bookkeeping. Returns the number of rows committed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn commit_order(&self, order_id: Uuid) -> Result<u64, ServiceError> {
        let result = ReservationEntity::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Committed.as_str()),
            )
            .col_expr(
                inventory_reservation::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_reservation::Column::OrderId.eq(order_id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Reserved.as_str()),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(order_id = %order_id, rows = result.rows_affected, "reservations committed");
            let _ = self.event_sender.send(Event::InventoryCommitted(order_id)).await;
        }
        Ok(result.rows_affected)
    }

    /// Restores stock for every still-reserved line of an order. Each ledger
    /// row is flipped `reserved -> released` with a guarded update before its
    /// stock is credited back, so a second release finds nothing to flip and
    /// credits nothing.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release_order(&self, order_id: Uuid) -> Result<u64, ServiceError> {
        let reservations = ReservationEntity::find()
            .filter(inventory_reservation::Column::OrderId.eq(order_id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Reserved.as_str()),
            )
            .all(&*self.db)
            .await?;

        let mut released = 0u64;
        for reservation in reservations {
            let claimed = ReservationEntity::update_many()
                .col_expr(
                    inventory_reservation::Column::Status,
                    Expr::value(ReservationStatus::Released.as_str()),
                )
                .col_expr(
                    inventory_reservation::Column::UpdatedAt,
                    Expr::value(Some(Utc::now())),
                )
                .filter(inventory_reservation::Column::Id.eq(reservation.id))
                .filter(
                    inventory_reservation::Column::Status
                        .eq(ReservationStatus::Reserved.as_str()),
                )
                .exec(&*self.db)
                .await?;

            if claimed.rows_affected == 0 {
                // Another caller resolved this row between the read and the
                // flip; its stock is not ours to credit.
                continue;
            }

            InventoryLevelEntity::update_many()
                .col_expr(
                    inventory_level::Column::Stock,
                    Expr::col(inventory_level::Column::Stock).add(reservation.quantity),
                )
                .col_expr(
                    inventory_level::Column::UpdatedAt,
                    Expr::value(Some(Utc::now())),
                )
                .filter(inventory_level::Column::ProductId.eq(reservation.product_id))
                .filter(inventory_level::Column::VariantName.eq(reservation.variant_name.clone()))
                .exec(&*self.db)
                .await?;

            released += 1;
        }

        if released > 0 {
            info!(order_id = %order_id, rows = released, "reservations released");
            let _ = self.event_sender.send(Event::InventoryReleased(order_id)).await;
        }
        Ok(released)
    }

    /// Creates or replaces the stock level for a variant.
    #[instrument(skip(self))]
    pub async fn set_stock(
        &self,
        product_id: Uuid,
        variant_name: &str,
        stock: i32,
    ) -> Result<(), ServiceError> {
        if stock < 0 {
            return Err(ServiceError::ValidationError(
                "Stock cannot be negative".to_string(),
            ));
        }

        let existing = InventoryLevelEntity::find()
            .filter(inventory_level::Column::ProductId.eq(product_id))
            .filter(inventory_level::Column::VariantName.eq(variant_name))
            .one(&*self.db)
            .await?;

        match existing {
            Some(level) => {
                let mut active: inventory_level::ActiveModel = level.into();
                active.stock = Set(stock);
                active.updated_at = Set(Some(Utc::now()));
                active.update(&*self.db).await?;
            }
            None => {
                let level = inventory_level::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product_id),
                    variant_name: Set(variant_name.to_string()),
                    stock: Set(stock),
                    created_at: Set(Utc::now()),
                    updated_at: Set(None),
                };
                level.insert(&*self.db).await?;
            }
        }
        Ok(())
    }

    /// Best-effort release used after the order durably exists; failures are
    /// logged and swallowed, inventory drift is reconciled operationally.
    pub async fn release_order_best_effort(&self, order_id: Uuid) {
        if let Err(e) = self.release_order(order_id).await {
            warn!(order_id = %order_id, error = %e, "inventory release failed; continuing");
        }
    }

    /// Best-effort commit counterpart of [`release_order_best_effort`].
    pub async fn commit_order_best_effort(&self, order_id: Uuid) {
        if let Err(e) = self.commit_order(order_id).await {
            warn!(order_id = %order_id, error = %e, "inventory commit failed; continuing");
        }
    }
}
