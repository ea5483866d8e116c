//! The saga orchestrator state machine.

use chrono::Utc;
use common::SagaId;
use domain::{
    EventItem, Order, OrderStatus, SagaEnvelope, SagaState, SagaStatus, SagaStep, topics,
};
use messaging::EventPublisher;
use store::{OrderStore, SagaStore, StoreError};

use crate::error::{Result, SagaError};

/// Drives order fulfillment sagas over the message bus.
///
/// Incoming `saga-response` events are the only signal that advances a
/// saga; the orchestrator never polls. Every advance writes the new step
/// before publishing the event it implies, so the persisted step is the
/// authoritative record of how far the saga got.
pub struct SagaOrchestrator<St, P>
where
    St: OrderStore + SagaStore,
    P: EventPublisher,
{
    store: St,
    publisher: P,
}

impl<St, P> SagaOrchestrator<St, P>
where
    St: OrderStore + SagaStore,
    P: EventPublisher,
{
    /// Creates a new orchestrator.
    pub fn new(store: St, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Starts a saga for an order and dispatches the reservation request.
    ///
    /// Idempotent by order id: retrying with the same order returns the
    /// saga that already exists instead of creating a second one.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn start_saga(&self, order: &Order) -> Result<SagaId> {
        let saga = SagaState::new(order)?;

        match self.store.insert_saga(&saga).await {
            Ok(()) => {}
            Err(StoreError::DuplicateSaga(_)) => {
                if let Some(existing) = self.store.saga_for_order(order.id).await? {
                    tracing::info!(saga_id = %existing.saga_id, "saga already exists for order");
                    return Ok(existing.saga_id);
                }
                return Err(SagaError::Persistence(StoreError::DuplicateSaga(order.id)));
            }
            Err(e) => return Err(e.into()),
        }

        self.store.set_order_saga(order.id, saga.saga_id).await?;
        metrics::counter!("saga_started_total").increment(1);

        let request = SagaEnvelope::reserve_request(saga.saga_id, order);
        self.publisher
            .publish(topics::INVENTORY_RESERVE, &request)
            .await?;

        tracing::info!(saga_id = %saga.saga_id, "saga started");
        Ok(saga.saga_id)
    }

    /// Consumes one `saga-response` event and advances or compensates.
    ///
    /// Idempotent by (saga id, incoming step): responses for unknown
    /// sagas, responses for terminal sagas, and responses whose transition
    /// was already applied are all logged and dropped. A lost outbound
    /// publish is repaired by the recovery sweep, not by redelivery.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id, step = %event.step, success = event.success))]
    pub async fn handle_response(&self, event: &SagaEnvelope) -> Result<()> {
        let Some(saga) = self.store.saga(event.saga_id).await? else {
            tracing::warn!("response for unknown saga, skipping");
            return Ok(());
        };

        if saga.status.is_terminal() {
            tracing::info!("response for terminal saga, discarding");
            return Ok(());
        }

        if !event.success {
            return self.compensate(&saga, event).await;
        }

        match event.step {
            SagaStep::InventoryReserved => match saga.current_step {
                SagaStep::Initiated => {
                    self.store
                        .advance_saga(saga.saga_id, SagaStep::InventoryReserved)
                        .await?;
                    self.request_payment(&saga).await
                }
                _ => {
                    tracing::info!("reservation response does not advance this saga, dropping");
                    Ok(())
                }
            },
            SagaStep::PaymentProcessed => match saga.current_step {
                SagaStep::InventoryReserved => {
                    self.store
                        .advance_saga(saga.saga_id, SagaStep::PaymentProcessed)
                        .await?;
                    self.complete_order(&saga).await
                }
                _ => {
                    tracing::info!("payment response does not advance this saga, dropping");
                    Ok(())
                }
            },
            _ => {
                tracing::warn!("unexpected step in saga response, skipping");
                Ok(())
            }
        }
    }

    /// Re-drives the outbound action implied by `current_step` for every
    /// saga still in progress. Run once at startup: it repairs sagas whose
    /// pre-crash publish was lost between the state write and the send.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.sagas_in_progress().await?;
        let mut resumed = 0;

        for saga in pending {
            match self.resume(&saga).await {
                Ok(()) => {
                    resumed += 1;
                    tracing::info!(
                        saga_id = %saga.saga_id,
                        step = %saga.current_step,
                        "re-dispatched pending saga action"
                    );
                }
                Err(e) => {
                    tracing::error!(saga_id = %saga.saga_id, error = %e, "failed to resume saga");
                }
            }
        }

        Ok(resumed)
    }

    async fn resume(&self, saga: &SagaState) -> Result<()> {
        match saga.current_step {
            SagaStep::Initiated => {
                let order = saga.order_snapshot()?;
                let request = SagaEnvelope::reserve_request(saga.saga_id, &order);
                self.publisher
                    .publish(topics::INVENTORY_RESERVE, &request)
                    .await?;
                Ok(())
            }
            SagaStep::InventoryReserved => self.request_payment(saga).await,
            SagaStep::PaymentProcessed => self.complete_order(saga).await,
            SagaStep::InventoryRollback => self.finish_rollback(saga).await,
            step => {
                tracing::warn!(saga_id = %saga.saga_id, %step, "in-progress saga at unexpected step");
                Ok(())
            }
        }
    }

    async fn request_payment(&self, saga: &SagaState) -> Result<()> {
        let order = saga.order_snapshot()?;
        let request = SagaEnvelope::payment_request(saga.saga_id, &order);
        self.publisher
            .publish(topics::PAYMENT_PROCESS, &request)
            .await?;
        Ok(())
    }

    /// Final step: confirm the order and announce completion.
    ///
    /// The completion event goes out first (its authorizing step,
    /// `PAYMENT_PROCESSED`, is already durable); only then does the saga
    /// close, so a crash in between leaves a sweep-recoverable saga rather
    /// than a terminal one with a lost announcement.
    async fn complete_order(&self, saga: &SagaState) -> Result<()> {
        let order = saga.order_snapshot()?;
        let items: Vec<EventItem> = order.items.iter().map(EventItem::from).collect();
        let event = SagaEnvelope::completed(saga.saga_id, saga.order_id, items);
        self.publisher
            .publish(topics::ORDER_COMPLETED, &event)
            .await?;

        self.store
            .set_order_status(saga.order_id, OrderStatus::Confirmed)
            .await?;
        self.store
            .close_saga(
                saga.saga_id,
                SagaStep::OrderCompleted,
                SagaStatus::Completed,
            )
            .await?;

        metrics::counter!("saga_completed").increment(1);
        let duration = (Utc::now() - saga.created_at).num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("saga_duration_seconds").record(duration);
        tracing::info!(saga_id = %saga.saga_id, order_id = %saga.order_id, "order completed");
        Ok(())
    }

    async fn compensate(&self, saga: &SagaState, event: &SagaEnvelope) -> Result<()> {
        tracing::warn!(
            saga_id = %saga.saga_id,
            failed_step = %event.step,
            message = %event.message,
            "rolling back saga"
        );

        match event.step {
            SagaStep::InventoryReserved if saga.current_step == SagaStep::Initiated => {
                // The reservation never happened; nothing to undo.
                self.store
                    .close_saga(saga.saga_id, saga.current_step, SagaStatus::RolledBack)
                    .await?;
                self.store
                    .set_order_status(saga.order_id, OrderStatus::Failed)
                    .await?;
                metrics::counter!("saga_rolled_back").increment(1);
                Ok(())
            }
            SagaStep::PaymentProcessed if saga.current_step == SagaStep::InventoryReserved => {
                // A reservation is held: record the compensation step, then
                // publish the rollback so a crash in between is recoverable.
                self.store
                    .advance_saga(saga.saga_id, SagaStep::InventoryRollback)
                    .await?;
                self.finish_rollback(saga).await
            }
            SagaStep::PaymentProcessed if saga.current_step == SagaStep::InventoryRollback => {
                tracing::info!("redelivered payment failure, re-driving rollback");
                self.finish_rollback(saga).await
            }
            _ => {
                tracing::warn!("failure response does not match saga state, skipping");
                Ok(())
            }
        }
    }

    /// Publishes the inventory rollback and closes the saga.
    ///
    /// The compensation payload comes from the persisted order snapshot,
    /// never from the incoming event.
    async fn finish_rollback(&self, saga: &SagaState) -> Result<()> {
        let order = saga.order_snapshot()?;
        let items: Vec<EventItem> = order.items.iter().map(EventItem::from).collect();
        let rollback = SagaEnvelope::rollback_request(saga.saga_id, saga.order_id, items);
        self.publisher
            .publish(topics::INVENTORY_ROLLBACK, &rollback)
            .await?;

        self.store
            .close_saga(
                saga.saga_id,
                SagaStep::InventoryRollback,
                SagaStatus::RolledBack,
            )
            .await?;
        self.store
            .set_order_status(saga.order_id, OrderStatus::Failed)
            .await?;

        metrics::counter!("saga_rolled_back").increment(1);
        tracing::info!(saga_id = %saga.saga_id, order_id = %saga.order_id, "saga rolled back");
        Ok(())
    }
}
