use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use storefront_api::{
    app, config,
    db::{establish_connection_from_app_config, run_migrations},
    events::{process_events, EventSender},
    gateway::HttpPaymentGateway,
    handlers::AppServices,
    notifications::LogNotifier,
    services::{
        checkout::CheckoutService, coupons::CouponService, expiry, expiry::ExpiryService,
        inventory::InventoryService, order_status::OrderStatusService, payments::PaymentService,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    let db = Arc::new(db);
    if cfg.auto_migrate {
        run_migrations(&db).await?;
        info!("database migrations applied");
    }

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = EventSender::new(event_tx);
    tokio::spawn(process_events(event_rx));

    let gateway = Arc::new(HttpPaymentGateway::new(
        cfg.gateway.base_url.clone(),
        cfg.gateway.key_id.clone(),
        cfg.gateway.key_secret.clone(),
    ));
    let notifier = Arc::new(LogNotifier);

    let inventory = InventoryService::new(db.clone(), event_sender.clone());
    let coupons = CouponService::new(db.clone());
    let expiry_service = ExpiryService::new(
        db.clone(),
        inventory.clone(),
        coupons.clone(),
        notifier.clone(),
        event_sender.clone(),
    );
    let checkout = CheckoutService::new(
        db.clone(),
        inventory.clone(),
        coupons.clone(),
        gateway.clone(),
        notifier.clone(),
        event_sender.clone(),
        cfg.checkout.clone(),
    );
    let payments = PaymentService::new(
        db.clone(),
        inventory.clone(),
        gateway.clone(),
        notifier.clone(),
        event_sender.clone(),
        expiry_service.clone(),
        cfg.gateway.key_secret.clone(),
        cfg.gateway.webhook_secret.clone(),
    );
    let order_status = OrderStatusService::new(
        db.clone(),
        inventory.clone(),
        coupons.clone(),
        notifier.clone(),
        event_sender.clone(),
    );

    // Authoritative expiry pass runs on a schedule; order reads only get the
    // lazy fast path.
    expiry::spawn_sweeper(expiry_service.clone(), cfg.expiry_sweep_interval_secs);

    let state = AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services: AppServices {
            checkout,
            inventory,
            coupons,
            payments,
            order_status,
            expiry: expiry_service,
        },
    };

    let addr = SocketAddr::new(cfg.host.parse()?, cfg.port);
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
