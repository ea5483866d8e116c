//! Orders and their line items.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::value_objects::{Money, ProductId};

/// Lifecycle status of an order.
///
/// An order starts `PENDING` and is moved to a terminal status by the
/// saga orchestrator once the fulfillment saga settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Returns the status name as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised when constructing an order from client input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// The owning user ID was missing or blank.
    #[error("user_id must not be empty")]
    EmptyUserId,

    /// An order needs at least one line item.
    #[error("order must contain at least one item")]
    NoItems,

    /// Quantities are strictly positive.
    #[error("invalid quantity for product {product_id}: must be at least 1")]
    InvalidQuantity { product_id: ProductId },

    /// Unit prices are non-negative.
    #[error("invalid price for product {product_id}: must not be negative")]
    NegativePrice { product_id: ProductId },
}

/// Line item requested by a client, before the order identity exists.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
}

/// A persisted order line item. Immutable after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
}

/// An order owned by a user, driven through fulfillment by a saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub saga_id: Option<SagaId>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates client input and builds a new `PENDING` order.
    ///
    /// The total amount is the sum of `price * quantity` over all items.
    pub fn create(
        user_id: impl Into<String>,
        items: Vec<NewOrderItem>,
    ) -> Result<Self, OrderError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(OrderError::EmptyUserId);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let order_id = OrderId::new();
        let mut total = Money::zero();
        let mut order_items = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                });
            }
            if item.price.is_negative() {
                return Err(OrderError::NegativePrice {
                    product_id: item.product_id,
                });
            }
            total += item.price.multiply(item.quantity);
            order_items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: order_id,
            user_id,
            total_amount: total,
            status: OrderStatus::Pending,
            saga_id: None,
            items: order_items,
            created_at: now,
            updated_at: now,
        })
    }
}
