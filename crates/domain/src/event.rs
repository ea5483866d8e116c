//! Wire events exchanged between the order and inventory services.
//!
//! Every message is a UTF-8 JSON `SagaEnvelope`. The `data` field carries a
//! typed, per-step payload rather than an untyped map, so consumers can
//! schema-check it at the point of use.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderItem};
use crate::saga::SagaStep;
use crate::value_objects::{Money, ProductId};

/// Topic names shared by both services.
pub mod topics {
    pub const INVENTORY_RESERVE: &str = "inventory-reserve";
    pub const INVENTORY_ROLLBACK: &str = "inventory-rollback";
    pub const PAYMENT_PROCESS: &str = "payment-process";
    pub const SAGA_RESPONSE: &str = "saga-response";
    pub const ORDER_COMPLETED: &str = "order-completed";
}

/// One line item as carried inside event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
}

impl From<&OrderItem> for EventItem {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            price: item.price,
        }
    }
}

/// Per-step `data` payload.
///
/// Reserve, rollback, and completion events carry the item list; payment
/// requests carry the buyer and the amount to charge. Responses carry no
/// data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepData {
    Items { items: Vec<EventItem> },
    Payment { user_id: String, total_amount: Money },
}

/// The JSON envelope published on every topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaEnvelope {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub step: SagaStep,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StepData>,
    pub timestamp: DateTime<Utc>,
}

impl SagaEnvelope {
    fn new(
        saga_id: SagaId,
        order_id: OrderId,
        step: SagaStep,
        success: bool,
        message: impl Into<String>,
        data: Option<StepData>,
    ) -> Self {
        Self {
            saga_id,
            order_id,
            step,
            success,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Request to reserve stock for the order's items.
    pub fn reserve_request(saga_id: SagaId, order: &Order) -> Self {
        Self::new(
            saga_id,
            order.id,
            SagaStep::InventoryReserved,
            true,
            "reserve inventory request",
            Some(StepData::Items {
                items: order.items.iter().map(EventItem::from).collect(),
            }),
        )
    }

    /// Request to charge the buyer for the order total.
    pub fn payment_request(saga_id: SagaId, order: &Order) -> Self {
        Self::new(
            saga_id,
            order.id,
            SagaStep::PaymentProcessed,
            true,
            "process payment request",
            Some(StepData::Payment {
                user_id: order.user_id.clone(),
                total_amount: order.total_amount,
            }),
        )
    }

    /// Compensation request to release previously reserved stock.
    pub fn rollback_request(saga_id: SagaId, order_id: OrderId, items: Vec<EventItem>) -> Self {
        Self::new(
            saga_id,
            order_id,
            SagaStep::InventoryRollback,
            true,
            "rollback inventory request",
            Some(StepData::Items { items }),
        )
    }

    /// Terminal notification that the order confirmed; carries the items so
    /// the inventory service can commit the reservation.
    pub fn completed(saga_id: SagaId, order_id: OrderId, items: Vec<EventItem>) -> Self {
        Self::new(
            saga_id,
            order_id,
            SagaStep::OrderCompleted,
            true,
            "order completed",
            Some(StepData::Items { items }),
        )
    }

    /// A participant's report on the outcome of a step.
    pub fn response(
        saga_id: SagaId,
        order_id: OrderId,
        step: SagaStep,
        success: bool,
        message: impl Into<String>,
    ) -> Self {
        Self::new(saga_id, order_id, step, success, message, None)
    }

    /// The item list, if this event carries one.
    pub fn items(&self) -> Option<&[EventItem]> {
        match &self.data {
            Some(StepData::Items { items }) => Some(items),
            _ => None,
        }
    }

    /// The payment details, if this event carries them.
    pub fn payment(&self) -> Option<(&str, Money)> {
        match &self.data {
            Some(StepData::Payment {
                user_id,
                total_amount,
            }) => Some((user_id, *total_amount)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::NewOrderItem;

    fn sample_order() -> Order {
        Order::create(
            "u1",
            vec![
                NewOrderItem {
                    product_id: ProductId::new("P1"),
                    quantity: 3,
                    price: Money::from_cents(500),
                },
                NewOrderItem {
                    product_id: ProductId::new("P2"),
                    quantity: 1,
                    price: Money::from_cents(250),
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_reserve_request_wire_shape() {
        let order = sample_order();
        let saga_id = SagaId::new();
        let event = SagaEnvelope::reserve_request(saga_id, &order);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], "INVENTORY_RESERVED");
        assert_eq!(json["success"], true);
        assert_eq!(json["saga_id"], saga_id.to_string());
        assert_eq!(json["order_id"], order.id.to_string());
        assert_eq!(json["data"]["items"][0]["product_id"], "P1");
        assert_eq!(json["data"]["items"][0]["quantity"], 3);
        assert_eq!(json["data"]["items"][0]["price"], 500);
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn test_payment_request_wire_shape() {
        let order = sample_order();
        let event = SagaEnvelope::payment_request(SagaId::new(), &order);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], "PAYMENT_PROCESSED");
        assert_eq!(json["data"]["user_id"], "u1");
        assert_eq!(json["data"]["total_amount"], 1750);
    }

    #[test]
    fn test_response_carries_no_data() {
        let event = SagaEnvelope::response(
            SagaId::new(),
            OrderId::new(),
            SagaStep::InventoryReserved,
            false,
            "insufficient stock",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "insufficient stock");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let order = sample_order();
        let event = SagaEnvelope::reserve_request(SagaId::new(), &order);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: SagaEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.saga_id, event.saga_id);
        assert_eq!(parsed.step, event.step);
        assert_eq!(parsed.items().unwrap().len(), 2);
    }

    #[test]
    fn test_typed_accessors_check_schema() {
        let order = sample_order();
        let reserve = SagaEnvelope::reserve_request(SagaId::new(), &order);
        assert!(reserve.items().is_some());
        assert!(reserve.payment().is_none());

        let payment = SagaEnvelope::payment_request(SagaId::new(), &order);
        assert!(payment.items().is_none());
        let (user_id, total) = payment.payment().unwrap();
        assert_eq!(user_id, "u1");
        assert_eq!(total, Money::from_cents(1750));
    }

    #[test]
    fn test_unknown_step_envelope_still_parses() {
        let json = serde_json::json!({
            "saga_id": SagaId::new().to_string(),
            "order_id": OrderId::new().to_string(),
            "step": "LOYALTY_POINTS_GRANTED",
            "success": true,
            "message": "",
            "timestamp": Utc::now().to_rfc3339(),
        });
        let parsed: SagaEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.step, SagaStep::Unknown);
    }
}
