//! Inventory service entry point: three topic consumers plus a small
//! health/metrics listener.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use common::Config;
use domain::topics;
use inventory::{InventoryListener, PgInventoryStore};
use messaging::{KafkaEventConsumer, KafkaEventProducer, RedisDedupStore};
use sqlx::postgres::PgPoolOptions;
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
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let producer =
        KafkaEventProducer::new(&config.kafka_brokers).expect("failed to create Kafka producer");
    let dedup = RedisDedupStore::new(&config.redis_host)
        .await
        .expect("failed to connect to Redis");
    let store = PgInventoryStore::new(pool);

    let listener = Arc::new(InventoryListener::new(
        store,
        dedup,
        producer,
        config.dedup_ttl,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_tasks = Vec::new();

    {
        let listener = Arc::clone(&listener);
        let consumer = KafkaEventConsumer::new(
            &config.kafka_brokers,
            "inventory-service-reserve",
            topics::INVENTORY_RESERVE,
        )
        .expect("failed to create reserve consumer");
        let shutdown = shutdown_rx.clone();
        consumer_tasks.push(tokio::spawn(async move {
            consumer
                .run(shutdown, |event| {
                    let listener = Arc::clone(&listener);
                    async move { listener.handle_reserve(&event).await }
                })
                .await;
        }));
    }

    {
        let listener = Arc::clone(&listener);
        let consumer = KafkaEventConsumer::new(
            &config.kafka_brokers,
            "inventory-service-rollback",
            topics::INVENTORY_ROLLBACK,
        )
        .expect("failed to create rollback consumer");
        let shutdown = shutdown_rx.clone();
        consumer_tasks.push(tokio::spawn(async move {
            consumer
                .run(shutdown, |event| {
                    let listener = Arc::clone(&listener);
                    async move { listener.handle_rollback(&event).await }
                })
                .await;
        }));
    }

    {
        let listener = Arc::clone(&listener);
        let consumer = KafkaEventConsumer::new(
            &config.kafka_brokers,
            "inventory-service-commit",
            topics::ORDER_COMPLETED,
        )
        .expect("failed to create commit consumer");
        let shutdown = shutdown_rx.clone();
        consumer_tasks.push(tokio::spawn(async move {
            consumer
                .run(shutdown, |event| {
                    let listener = Arc::clone(&listener);
                    async move { listener.handle_completed(&event).await }
                })
                .await;
        }));
    }

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        );

    let addr = config.addr();
    tracing::info!(%addr, "starting inventory service");
    let http_listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Ask the consumers to stop and give in-flight handlers a bounded wait.
    let _ = shutdown_tx.send(true);
    for task in consumer_tasks {
        if tokio::time::timeout(config.shutdown_grace, task).await.is_err() {
            tracing::warn!("consumer did not stop within the grace period");
        }
    }

    tracing::info!("inventory service shut down gracefully");
}
