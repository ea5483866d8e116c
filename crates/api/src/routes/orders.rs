//! Order creation and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Money, NewOrderItem, Order, ProductId};
use inventory::InventoryStore;
use messaging::EventPublisher;
use saga::{SagaError, SagaOrchestrator};
use serde::{Deserialize, Serialize};
use store::{OrderStore, SagaStore};

use crate::error::ApiError;

/// Maximum number of rows returned by listing endpoints.
pub const LIST_LIMIT: i64 = 100;

/// Shared application state accessible from all handlers.
pub struct AppState<St, I, P>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    pub store: St,
    pub inventory: I,
    pub orchestrator: Arc<SagaOrchestrator<St, P>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
    /// Unit price in cents.
    pub price: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub saga_id: Option<String>,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub total_amount: i64,
    pub status: String,
    pub saga_id: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price: i64,
}

#[derive(Serialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saga_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.clone(),
            total_amount: order.total_amount.cents(),
            status: order.status.to_string(),
            saga_id: order.saga_id.map(|id| id.to_string()),
            items: order
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    price: item.price.cents(),
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

// -- Handlers --

/// POST /api/orders — create an order and start its fulfillment saga.
///
/// Always answers promptly with `PENDING`; the terminal status is
/// observable via the status endpoint once the saga settles. A failed
/// dispatch is not fatal here: the saga row is durable and the recovery
/// sweep re-publishes the request.
#[tracing::instrument(skip(state, req))]
pub async fn create<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderCreatedResponse>), ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let items: Vec<NewOrderItem> = req
        .items
        .into_iter()
        .map(|item| NewOrderItem {
            product_id: ProductId::new(item.product_id),
            quantity: item.quantity,
            price: Money::from_cents(item.price),
        })
        .collect();

    let order = Order::create(req.user_id, items)?;
    state.store.insert_order(&order).await?;

    let saga_id = match state.orchestrator.start_saga(&order).await {
        Ok(saga_id) => Some(saga_id),
        Err(SagaError::Dispatch(e)) => {
            tracing::warn!(order_id = %order.id, error = %e, "reserve dispatch failed, sweep will retry");
            state
                .store
                .saga_for_order(order.id)
                .await?
                .map(|s| s.saga_id)
        }
        Err(e) => return Err(e.into()),
    };

    let response = OrderCreatedResponse {
        order_id: order.id.to_string(),
        saga_id: saga_id.map(|id| id.to_string()),
        status: order.status.to_string(),
    };

    Ok((axum::http::StatusCode::CREATED, Json(response)))
}

/// GET /api/orders/{id} — load one order.
#[tracing::instrument(skip(state))]
pub async fn get<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let order_id = parse_order_id(&id)?;
    let order = state
        .store
        .order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /api/orders?user_id=… — list a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let user_id = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("user_id query parameter is required".to_string()))?;

    let orders = state.store.orders_for_user(&user_id, LIST_LIMIT).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /api/orders/{id}/status — order status plus saga progress.
#[tracing::instrument(skip(state))]
pub async fn status<St, I, P>(
    State(state): State<Arc<AppState<St, I, P>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusResponse>, ApiError>
where
    St: OrderStore + SagaStore,
    I: InventoryStore,
    P: EventPublisher,
{
    let order_id = parse_order_id(&id)?;
    let order = state
        .store
        .order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;

    let saga = match order.saga_id {
        Some(saga_id) => state.store.saga(saga_id).await?,
        None => None,
    };

    Ok(Json(OrderStatusResponse {
        order_id: order.id.to_string(),
        status: order.status.to_string(),
        saga_status: saga.as_ref().map(|s| s.status.to_string()),
        current_step: saga.as_ref().map(|s| s.current_step.to_string()),
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("invalid order id: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
