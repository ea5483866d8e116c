//! Order service entry point: HTTP edge, saga-response consumer, and the
//! startup recovery sweep.

use std::sync::Arc;

use api::AppState;
use common::Config;
use domain::topics;
use inventory::PgInventoryStore;
use messaging::{KafkaEventConsumer, KafkaEventProducer};
use saga::SagaOrchestrator;
use sqlx::postgres::PgPoolOptions;
use store::PgStore;
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
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect to the database and migrate
    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let store = PgStore::new(pool.clone());
    store.run_migrations().await.expect("failed to run migrations");

    // 4. Wire the orchestrator
    let producer =
        KafkaEventProducer::new(&config.kafka_brokers).expect("failed to create Kafka producer");
    let orchestrator = Arc::new(SagaOrchestrator::new(store.clone(), producer));

    // 5. Recovery sweep: re-dispatch whatever a crash may have lost
    match orchestrator.recover().await {
        Ok(resumed) if resumed > 0 => tracing::info!(resumed, "recovery sweep re-dispatched sagas"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "recovery sweep failed"),
    }

    // 6. Consume saga responses
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = KafkaEventConsumer::new(
        &config.kafka_brokers,
        "order-service-saga",
        topics::SAGA_RESPONSE,
    )
    .expect("failed to create saga-response consumer");
    let consumer_orchestrator = Arc::clone(&orchestrator);
    let consumer_task = tokio::spawn(async move {
        consumer
            .run(shutdown_rx, |event| {
                let orchestrator = Arc::clone(&consumer_orchestrator);
                async move { orchestrator.handle_response(&event).await }
            })
            .await;
    });

    // 7. Serve HTTP
    let state = Arc::new(AppState {
        store,
        inventory: PgInventoryStore::new(pool),
        orchestrator,
    });
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting order service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 8. Stop the consumer within the grace period
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(config.shutdown_grace, consumer_task)
        .await
        .is_err()
    {
        tracing::warn!("saga-response consumer did not stop within the grace period");
    }

    tracing::info!("order service shut down gracefully");
}
