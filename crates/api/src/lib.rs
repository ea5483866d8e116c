//! HTTP edge of the order service.
//!
//! Provides REST endpoints for order creation and status, inventory
//! queries, health, and Prometheus metrics, with structured logging.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::InventoryStore;
use messaging::EventPublisher;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{OrderStore, SagaStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<St, I, P>(
    state: Arc<AppState<St, I, P>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    St: OrderStore + SagaStore + 'static,
    I: InventoryStore + 'static,
    P: EventPublisher + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/api/orders", post(routes::orders::create::<St, I, P>))
        .route("/api/orders", get(routes::orders::list::<St, I, P>))
        .route("/api/orders/{id}", get(routes::orders::get::<St, I, P>))
        .route(
            "/api/orders/{id}/status",
            get(routes::orders::status::<St, I, P>),
        )
        .route(
            "/api/inventory/{product_id}",
            get(routes::inventory::get::<St, I, P>),
        )
        .route("/api/inventory", get(routes::inventory::list::<St, I, P>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
