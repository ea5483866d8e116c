//! Saga step machine and durable saga state.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// The step a saga has most recently committed to.
///
/// Steps are named by the action they represent on success. Steps received
/// from the wire that this service does not know are mapped to `Unknown`
/// and skipped, so newer peers can add steps without breaking us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    Initiated,
    InventoryReserved,
    PaymentProcessed,
    OrderCompleted,
    InventoryRollback,
    PaymentRollback,
    #[serde(other)]
    Unknown,
}

impl SagaStep {
    /// Returns the step name as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Initiated => "INITIATED",
            SagaStep::InventoryReserved => "INVENTORY_RESERVED",
            SagaStep::PaymentProcessed => "PAYMENT_PROCESSED",
            SagaStep::OrderCompleted => "ORDER_COMPLETED",
            SagaStep::InventoryRollback => "INVENTORY_ROLLBACK",
            SagaStep::PaymentRollback => "PAYMENT_ROLLBACK",
            SagaStep::Unknown => "UNKNOWN",
        }
    }

    /// Parses a stored step string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(SagaStep::Initiated),
            "INVENTORY_RESERVED" => Some(SagaStep::InventoryReserved),
            "PAYMENT_PROCESSED" => Some(SagaStep::PaymentProcessed),
            "ORDER_COMPLETED" => Some(SagaStep::OrderCompleted),
            "INVENTORY_ROLLBACK" => Some(SagaStep::InventoryRollback),
            "PAYMENT_ROLLBACK" => Some(SagaStep::PaymentRollback),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall status of a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl SagaStatus {
    /// Returns true once the saga can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::InProgress)
    }

    /// Returns the status name as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::RolledBack => "ROLLED_BACK",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(SagaStatus::InProgress),
            "COMPLETED" => Some(SagaStatus::Completed),
            "FAILED" => Some(SagaStatus::Failed),
            "ROLLED_BACK" => Some(SagaStatus::RolledBack),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable state of one saga, one-to-one with an order.
///
/// `payload` is a JSON snapshot of the order taken at saga start; all
/// compensation payloads are built from it rather than from incoming
/// events, which may be incomplete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub current_step: SagaStep,
    pub status: SagaStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// Creates the initial saga state for an order.
    pub fn new(order: &Order) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            saga_id: SagaId::new(),
            order_id: order.id,
            current_step: SagaStep::Initiated,
            status: SagaStatus::InProgress,
            payload: serde_json::to_value(order)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds the order as it looked when the saga started.
    pub fn order_snapshot(&self) -> Result<Order, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
