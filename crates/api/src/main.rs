//! Service entry point.

use std::sync::Arc;

use api::config::Config;
use api::middleware::RateLimiter;
use api::routes::orders::AppState;
use api::service::OrderService;
use order_store::{Db, PostgresIdempotencyStore, PostgresOrderStore};
use outbox::{KafkaPublisher, Relay};
use saga::{NoopExecutor, SagaManager, SagaStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let cfg = Config::from_env();

    // 3. Database pool and migrations
    let db = Db::connect(&cfg.database_url)
        .await
        .expect("database connect failed");
    db.migrate().await.expect("migrations failed");

    // One shutdown channel cancels every background task and both servers.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 4. Outbox relay
    let publisher = KafkaPublisher::new(&cfg.kafka_brokers, cfg.kafka_topic_orders.clone())
        .expect("kafka producer init failed");
    let relay = Relay::new(
        db.pool().clone(),
        publisher,
        cfg.outbox_relay_interval,
        cfg.outbox_relay_batch,
    );
    let relay_shutdown = shutdown_rx.clone();
    let relay_task = tokio::spawn(async move {
        if let Err(err) = relay.run(relay_shutdown).await {
            tracing::error!(error = %err, "outbox relay exited with error");
        }
    });

    // 5. Saga manager
    let saga_store = SagaStore::new(db.pool().clone());
    let manager = SagaManager::new(
        saga_store.clone(),
        NoopExecutor,
        SagaManager::<NoopExecutor>::DEFAULT_INTERVAL,
    );
    let manager_shutdown = shutdown_rx.clone();
    let manager_task = tokio::spawn(async move {
        if let Err(err) = manager.run(manager_shutdown).await {
            tracing::error!(error = %err, "saga manager exited with error");
        }
    });

    // 6. Application state and routers
    let service = OrderService::new(
        PostgresOrderStore::new(db.clone()),
        Some(Arc::new(saga_store)),
    );
    let state = Arc::new(AppState {
        service,
        idempotency: Arc::new(PostgresIdempotencyStore::new(db.clone())),
    });
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_rps, cfg.rate_limit_burst));
    let app = api::create_app(state, limiter);

    if cfg.auth_enabled {
        // OIDC verification runs at the gateway; the issuer is logged so a
        // misconfigured deployment is visible.
        tracing::info!(issuer = %cfg.oidc_issuer, "auth enabled");
    }

    // 7. Debug server (metrics)
    let debug_app = api::create_debug_app(metrics_handle);
    let debug_addr = cfg.debug_bind_addr();
    let mut debug_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&debug_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(addr = %debug_addr, error = %err, "debug server bind failed");
                return;
            }
        };
        tracing::info!(addr = %debug_addr, "debug server started");
        if let Err(err) = axum::serve(listener, debug_app)
            .with_graceful_shutdown(async move {
                let _ = debug_shutdown.changed().await;
            })
            .await
        {
            tracing::error!(error = %err, "debug server error");
        }
    });

    // 8. API server
    let addr = cfg.http_bind_addr();
    tracing::info!(addr = %addr, env = %cfg.app_env, "starting order service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut serve_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await
        .expect("server error");

    let _ = tokio::join!(relay_task, manager_task);
    tracing::info!("server shut down gracefully");
}
