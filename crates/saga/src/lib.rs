//! Saga orchestration for order fulfillment.
//!
//! The orchestrator drives an order through reserve-inventory,
//! process-payment, and complete-order via asynchronous messaging, and runs
//! the compensating rollback when a step reports failure. Saga state is
//! durable; the step transition is written before the outbound event it
//! implies is published, and a startup sweep re-publishes whatever a crash
//! may have lost in between.

pub mod error;
pub mod orchestrator;

pub use error::SagaError;
pub use orchestrator::SagaOrchestrator;
