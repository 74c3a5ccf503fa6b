use std::net::SocketAddr;
use std::sync::Arc;

use bookstore_orders::api::{self, AppState};
use bookstore_orders::config::AppConfig;
use bookstore_orders::database::book_repository::BookRepository;
use bookstore_orders::database::memory::InMemoryStore;
use bookstore_orders::database::order_repository::OrderRepository;
use bookstore_orders::database::user_repository::UserRepository;
use bookstore_orders::database::{init_pool_from_config, run_migrations};
use bookstore_orders::health::HealthChecker;
use bookstore_orders::logging::init_tracing;
use bookstore_orders::payments::VnpayGateway;
use bookstore_orders::services::clock::SystemClock;
use bookstore_orders::services::notification::NotificationService;
use bookstore_orders::services::order_service::{OrderService, OrderStores};
use bookstore_orders::workers::order_expiry::OrderExpiryWorker;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting bookstore order service"
    );

    // Stores
    let (stores, db_pool) = match &config.database {
        None => {
            info!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory store");
            (OrderStores::shared(Arc::new(InMemoryStore::new())), None)
        }
        Some(database) => {
            info!("Initializing database connection pool...");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            if database.run_migrations {
                run_migrations(&pool).await?;
            }
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );

            let books = Arc::new(BookRepository::new(pool.clone()));
            let stores = OrderStores {
                users: Arc::new(UserRepository::new(pool.clone())),
                books: books.clone(),
                inventory: books,
                orders: Arc::new(OrderRepository::new(pool.clone())),
            };
            (stores, Some(pool))
        }
    };

    let gateway = VnpayGateway::new(config.vnpay.clone())?;
    info!(pay_url = %config.vnpay.pay_url, "VNPay gateway configured");

    let orders = Arc::new(OrderService::new(
        stores,
        Arc::new(gateway),
        Arc::new(NotificationService::new()),
        Arc::new(SystemClock),
        config.orders.service_config(),
    ));

    // Expiry sweeper
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.sweeper.enabled {
        info!(
            interval_secs = config.sweeper.interval.as_secs(),
            batch_size = config.sweeper.batch_size,
            "Starting order expiry worker"
        );
        let worker = OrderExpiryWorker::new(orders.clone(), config.sweeper.clone());
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Order expiry worker disabled (ORDER_SWEEPER_ENABLED=false)");
        None
    };

    let health_checker = HealthChecker::new(db_pool, config.sweeper.enabled);
    let app = api::router(AppState {
        orders,
        health_checker,
    })
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for order expiry worker shutdown");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
