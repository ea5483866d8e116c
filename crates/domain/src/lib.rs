//! Core domain model for order fulfillment: orders, saga state, and the
//! wire events the services exchange over the message bus.

pub mod event;
pub mod order;
pub mod saga;
pub mod value_objects;

pub use event::{EventItem, SagaEnvelope, StepData, topics};
pub use order::{NewOrderItem, Order, OrderError, OrderItem, OrderStatus};
pub use saga::{SagaState, SagaStatus, SagaStep};
pub use value_objects::{Money, ProductId};
