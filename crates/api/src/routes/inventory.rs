//! Inventory query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::ProductId;
use inventory::{InventoryLevel, InventoryStore};
use messaging::EventPublisher;
use serde::Serialize;
use store::{OrderStore, SagaStore};

use crate::error::ApiError;
use crate::routes::orders::{AppState, LIST_LIMIT};

#[derive(Serialize)]
pub struct InventoryResponse {
    pub product_id: String,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<InventoryLevel> for InventoryResponse {
    fn from(level: InventoryLevel) -> Self {
        Self {
            product_id: level.product_id.to_string(),
            quantity: level.quantity,
            reserved_quantity: level.reserved_quantity,
            available: level.available,
            updated_at: level.updated_at,
        }
    }
}

/// GET /api/inventory/{product_id} — one product's counters.
#[tracing::instrument(skip(state))]
pub async fn get<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
    Path(product_id): Path<String>,
) -> Result<Json<InventoryResponse>, ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let level = state
        .inventory
        .product(&ProductId::new(product_id.clone()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("inventory for product {product_id} not found")))?;

    Ok(Json(level.into()))
}

/// GET /api/inventory — counters ordered by product id.
#[tracing::instrument(skip(state))]
pub async fn list<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
) -> Result<Json<Vec<InventoryResponse>>, ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let levels = state.inventory.levels(LIST_LIMIT).await?;
    Ok(Json(levels.into_iter().map(Into::into).collect()))
}
