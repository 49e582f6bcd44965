//! Domain services for the order lifecycle.

pub mod checkout;
pub mod coupons;
pub mod expiry;
pub mod inventory;
pub mod order_status;
pub mod payments;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use uuid::Uuid;

use crate::entities::order_status_history;
use crate::errors::ServiceError;

/// Appends a row to the order's status history trail.
pub(crate) async fn append_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: &str,
    message: impl Into<String>,
) -> Result<(), ServiceError> {
    let entry = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status.to_string()),
        message: Set(message.into()),
        created_at: Set(Utc::now()),
    };
    entry.insert(conn).await?;
    Ok(())
}
