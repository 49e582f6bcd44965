use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, DbErr> {
    let mut opts = ConnectOptions::new(database_url.to_string());
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    establish_connection(&cfg.database_url).await
}

/// Creates any missing tables. Works against both Postgres and SQLite, which
/// is also how the test harness bootstraps its in-memory database.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create_table {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(&stmt).await?;
        }};
    }

    create_table!(entities::Customer);
    create_table!(entities::CustomerAddress);
    create_table!(entities::Cart);
    create_table!(entities::CartItem);
    create_table!(entities::InventoryLevel);
    create_table!(entities::InventoryReservation);
    create_table!(entities::Coupon);
    create_table!(entities::CouponRedemption);
    create_table!(entities::Order);
    create_table!(entities::OrderItem);
    create_table!(entities::OrderStatusHistory);

    info!("Schema migrations applied");
    Ok(())
}
