//! Courtside HTTP server.
//!
//! Court reservations, hosted checkouts and provider webhooks.

use anyhow::Context;
use axum::{routing::get, Router};
use courtside::{
    cleanup::CleanupTask,
    config::{Config, StoreBackend},
    lifecycle::BookingEnvironment,
    notifier::BroadcastNotifier,
    payments::providers::{ProviderRegistry, StripeProvider, WayforpayProvider},
    server::{build_router, AppState, StoreProbe},
    store::{BookingStore, MemoryBookingStore, PostgresBookingStore},
    BookingEngine, PaymentOrchestrator,
};
use courtside_core::environment::SystemClock;
use courtside_postgres::PoolSettings;
use courtside_web::handlers::TopicBroadcaster;
use courtside_web::HeaderActorResolver;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courtside=info,courtside_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Courtside booking server");

    let config = Config::from_env();
    info!(
        backend = ?config.database.backend,
        hold_minutes = config.booking.hold_minutes,
        "Configuration loaded"
    );

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    courtside::metrics::register_business_metrics();

    let store = open_store(&config).await?;

    let notifier = BroadcastNotifier::new(TopicBroadcaster::new(config.realtime.channel_capacity));
    let env = BookingEnvironment::new(Arc::new(SystemClock), Arc::new(notifier.clone()), config.hold());
    let engine = BookingEngine::new(Arc::clone(&store), env, config.engine_settings());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.payments.provider_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let providers = ProviderRegistry::new()
        .with(Arc::new(StripeProvider::new(http.clone(), &config.payments.stripe_base_url)))
        .with(Arc::new(WayforpayProvider::new(http, &config.payments.wayforpay_base_url)));
    let payments = PaymentOrchestrator::new(engine.clone(), providers, config.payment_settings());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let cleanup = (config.booking.cleanup_interval_secs > 0).then(|| {
        CleanupTask::new(
            engine.clone(),
            Duration::from_secs(config.booking.cleanup_interval_secs),
            chrono::Duration::hours(config.booking.purge_expired_after_hours),
            shutdown_tx.subscribe(),
        )
        .spawn()
    });

    // Prometheus scrape endpoint on its own port
    let metrics_addr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port);
    let metrics_app = Router::new().route("/metrics", get(move || std::future::ready(prometheus.render())));
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    info!(address = %metrics_addr, "Metrics server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let state = AppState::new(
        engine,
        payments,
        notifier,
        Arc::new(HeaderActorResolver),
        vec![Arc::new(StoreProbe::new(store))],
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(());
    if let Some(handle) = cleanup {
        let timeout = Duration::from_secs(config.server.shutdown_timeout);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("Cleanup task stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Cleanup task failed"),
            Err(_) => warn!("Cleanup task shutdown timed out"),
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Open the configured booking store.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn BookingStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let settings = PoolSettings {
                url: config.database.url.clone(),
                max_connections: config.database.max_connections,
                min_connections: config.database.min_connections,
                connect_timeout: Duration::from_secs(config.database.connect_timeout),
                idle_timeout: Duration::from_secs(config.database.idle_timeout),
            };
            let pool = courtside_postgres::connect(&settings)
                .await
                .context("failed to connect to PostgreSQL")?;
            let store = PostgresBookingStore::new(Arc::new(pool));
            if config.database.run_migrations {
                store.migrate().await.context("failed to run migrations")?;
                info!("Migrations complete");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, bookings are lost on restart");
            Ok(Arc::new(MemoryBookingStore::new()))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
