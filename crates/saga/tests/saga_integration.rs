//! End-to-end saga tests over in-memory stores and bus.
//!
//! The in-memory publisher stands in for the broker: each test drains a
//! topic and hands the events to the consuming side by calling its handler
//! directly, exactly as the Kafka consumer loops do in production.

use std::time::Duration;

use domain::{
    Money, NewOrderItem, Order, OrderStatus, ProductId, SagaEnvelope, SagaStatus, SagaStep, topics,
};
use inventory::{InMemoryInventoryStore, InventoryListener, StockLevel};
use messaging::{InMemoryDedupStore, InMemoryPublisher};
use saga::SagaOrchestrator;
use store::{InMemoryStore, OrderStore, SagaStore};

struct TestHarness {
    orchestrator: SagaOrchestrator<InMemoryStore, InMemoryPublisher>,
    listener: InventoryListener<InMemoryInventoryStore, InMemoryDedupStore, InMemoryPublisher>,
    store: InMemoryStore,
    inventory: InMemoryInventoryStore,
    publisher: InMemoryPublisher,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let inventory = InMemoryInventoryStore::new();
        let publisher = InMemoryPublisher::new();

        let orchestrator = SagaOrchestrator::new(store.clone(), publisher.clone());
        let listener = InventoryListener::new(
            inventory.clone(),
            InMemoryDedupStore::new(),
            publisher.clone(),
            Duration::from_secs(3600),
        );

        Self {
            orchestrator,
            listener,
            store,
            inventory,
            publisher,
        }
    }

    async fn place_order(&self, product: &str, quantity: u32, price_cents: i64) -> Order {
        let order = Order::create(
            "u1",
            vec![NewOrderItem {
                product_id: ProductId::new(product),
                quantity,
                price: Money::from_cents(price_cents),
            }],
        )
        .unwrap();
        self.store.insert_order(&order).await.unwrap();
        self.orchestrator.start_saga(&order).await.unwrap();
        order
    }

    /// Delivers every pending `inventory-reserve` request to the inventory
    /// service and returns the reservation responses it produced.
    async fn deliver_reserve_requests(&self) -> Vec<SagaEnvelope> {
        for published in self.publisher.take_topic(topics::INVENTORY_RESERVE) {
            self.listener.handle_reserve(&published.event).await.unwrap();
        }
        self.publisher
            .take_topic(topics::SAGA_RESPONSE)
            .into_iter()
            .map(|p| p.event)
            .collect()
    }

    async fn deliver_rollback_requests(&self) {
        for published in self.publisher.take_topic(topics::INVENTORY_ROLLBACK) {
            self.listener
                .handle_rollback(&published.event)
                .await
                .unwrap();
        }
    }

    async fn deliver_completed_events(&self) {
        for published in self.publisher.take_topic(topics::ORDER_COMPLETED) {
            self.listener
                .handle_completed(&published.event)
                .await
                .unwrap();
        }
    }

    /// Simulates the payment service answering the pending payment request.
    fn payment_response(&self, success: bool) -> SagaEnvelope {
        let requests = self.publisher.take_topic(topics::PAYMENT_PROCESS);
        assert_eq!(requests.len(), 1, "expected exactly one payment request");
        let request = &requests[0].event;
        assert!(request.payment().is_some());
        SagaEnvelope::response(
            request.saga_id,
            request.order_id,
            SagaStep::PaymentProcessed,
            success,
            if success {
                "payment processed"
            } else {
                "card declined"
            },
        )
    }

    fn stock(&self, product: &str) -> StockLevel {
        self.inventory.level_of(&ProductId::new(product)).unwrap()
    }
}

#[tokio::test]
async fn test_happy_path_confirms_order_and_commits_stock() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;

    // Inventory reserves and responds.
    let responses = h.deliver_reserve_requests().await;
    assert_eq!(responses.len(), 1);
    assert!(responses[0].success);
    assert_eq!(h.stock("P1"), StockLevel::new(10, 3));
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    // Payment succeeds.
    let response = h.payment_response(true);
    h.orchestrator.handle_response(&response).await.unwrap();

    // Completion commits the reservation.
    h.deliver_completed_events().await;

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(saga.current_step, SagaStep::OrderCompleted);

    assert_eq!(h.stock("P1"), StockLevel::new(7, 0));
}

#[tokio::test]
async fn test_confirmed_order_implies_completed_saga() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 1, 100).await;
    let responses = h.deliver_reserve_requests().await;
    h.orchestrator.handle_response(&responses[0]).await.unwrap();
    let response = h.payment_response(true);
    h.orchestrator.handle_response(&response).await.unwrap();

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);

    // Every confirmed order must have a terminal, completed saga.
    let saga = h
        .store
        .saga(stored.saga_id.expect("confirmed order must carry a saga id"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(saga.current_step, SagaStep::OrderCompleted);
}

#[tokio::test]
async fn test_insufficient_stock_fails_order_without_compensation() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 2);

    let order = h.place_order("P1", 5, 500).await;

    let responses = h.deliver_reserve_requests().await;
    assert_eq!(responses.len(), 1);
    assert!(!responses[0].success);
    assert!(responses[0].message.contains("insufficient stock"));
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::RolledBack);

    // No payment was requested, no rollback was dispatched, stock untouched.
    assert_eq!(h.publisher.count_for_topic(topics::PAYMENT_PROCESS), 0);
    assert_eq!(h.publisher.count_for_topic(topics::INVENTORY_ROLLBACK), 0);
    assert_eq!(h.stock("P1"), StockLevel::new(2, 0));
}

#[tokio::test]
async fn test_payment_failure_releases_the_reservation() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;

    let responses = h.deliver_reserve_requests().await;
    h.orchestrator.handle_response(&responses[0]).await.unwrap();
    assert_eq!(h.stock("P1"), StockLevel::new(10, 3));

    // Payment fails; the orchestrator dispatches the compensation.
    let response = h.payment_response(false);
    h.orchestrator.handle_response(&response).await.unwrap();
    h.deliver_rollback_requests().await;

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::RolledBack);
    assert_eq!(saga.current_step, SagaStep::InventoryRollback);

    assert_eq!(h.stock("P1"), StockLevel::new(10, 0));
}

#[tokio::test]
async fn test_duplicate_reservation_response_after_completion_is_a_no_op() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;

    let responses = h.deliver_reserve_requests().await;
    h.orchestrator.handle_response(&responses[0]).await.unwrap();
    let payment = h.payment_response(true);
    h.orchestrator.handle_response(&payment).await.unwrap();
    h.deliver_completed_events().await;

    // Redeliver the reservation response after the saga settled.
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    // No second payment request went out, and the final state is unchanged.
    assert_eq!(h.publisher.count_for_topic(topics::PAYMENT_PROCESS), 0);
    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);
    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(h.stock("P1"), StockLevel::new(7, 0));
}

#[tokio::test]
async fn test_duplicate_reservation_response_mid_flight_sends_one_payment_request() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;

    let responses = h.deliver_reserve_requests().await;
    assert_eq!(responses.len(), 1);

    // Redeliver the same success while the saga is still awaiting payment.
    h.orchestrator.handle_response(&responses[0]).await.unwrap();
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    // The already-applied transition is a no-op: one payment request only.
    assert_eq!(h.publisher.count_for_topic(topics::PAYMENT_PROCESS), 1);

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.current_step, SagaStep::InventoryReserved);
    assert_eq!(saga.status, SagaStatus::InProgress);
    assert_eq!(h.stock("P1"), StockLevel::new(10, 3));
}

#[tokio::test]
async fn test_duplicate_payment_failure_rolls_back_once() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;
    let responses = h.deliver_reserve_requests().await;
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    let failure = h.payment_response(false);
    h.orchestrator.handle_response(&failure).await.unwrap();
    // Terminal saga discards the redelivered failure.
    h.orchestrator.handle_response(&failure).await.unwrap();
    h.deliver_rollback_requests().await;

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);
    assert_eq!(h.stock("P1"), StockLevel::new(10, 0));
}

#[tokio::test]
async fn test_replayed_reserve_message_reserves_once() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 3, 500).await;

    // Capture the reserve request and deliver it twice.
    let requests = h.publisher.take_topic(topics::INVENTORY_RESERVE);
    assert_eq!(requests.len(), 1);
    h.listener.handle_reserve(&requests[0].event).await.unwrap();
    h.listener.handle_reserve(&requests[0].event).await.unwrap();

    // A single reservation is held despite two deliveries.
    assert_eq!(h.stock("P1"), StockLevel::new(10, 3));

    // Both responses advance the saga at most once.
    let responses: Vec<SagaEnvelope> = h
        .publisher
        .take_topic(topics::SAGA_RESPONSE)
        .into_iter()
        .map(|p| p.event)
        .collect();
    assert_eq!(responses.len(), 2);
    h.orchestrator.handle_response(&responses[0]).await.unwrap();

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.current_step, SagaStep::InventoryReserved);
}

#[tokio::test]
async fn test_recovery_sweep_republishes_lost_reserve_request() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    // The saga row is written but the reserve publish is lost.
    let order = Order::create(
        "u1",
        vec![NewOrderItem {
            product_id: ProductId::new("P1"),
            quantity: 2,
            price: Money::from_cents(100),
        }],
    )
    .unwrap();
    h.store.insert_order(&order).await.unwrap();
    h.publisher.set_fail_publish(true);
    assert!(h.orchestrator.start_saga(&order).await.is_err());
    h.publisher.set_fail_publish(false);
    assert_eq!(h.publisher.count_for_topic(topics::INVENTORY_RESERVE), 0);

    // Startup sweep re-drives the pending action and the saga completes.
    let resumed = h.orchestrator.recover().await.unwrap();
    assert_eq!(resumed, 1);

    let responses = h.deliver_reserve_requests().await;
    h.orchestrator.handle_response(&responses[0]).await.unwrap();
    let payment = h.payment_response(true);
    h.orchestrator.handle_response(&payment).await.unwrap();
    h.deliver_completed_events().await;

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert_eq!(h.stock("P1"), StockLevel::new(8, 0));
}

#[tokio::test]
async fn test_recovery_sweep_republishes_lost_payment_request() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let order = h.place_order("P1", 2, 100).await;
    let responses = h.deliver_reserve_requests().await;

    // The step write lands but the payment publish is lost.
    h.publisher.set_fail_publish(true);
    assert!(h.orchestrator.handle_response(&responses[0]).await.is_err());
    h.publisher.set_fail_publish(false);

    let saga = h.store.saga_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(saga.current_step, SagaStep::InventoryReserved);
    assert_eq!(saga.status, SagaStatus::InProgress);

    let resumed = h.orchestrator.recover().await.unwrap();
    assert_eq!(resumed, 1);
    assert_eq!(h.publisher.count_for_topic(topics::PAYMENT_PROCESS), 1);
}

#[tokio::test]
async fn test_independent_sagas_do_not_interfere() {
    let h = TestHarness::new();
    h.inventory.seed("P1", 10);

    let first = h.place_order("P1", 2, 100).await;
    let second = h.place_order("P1", 9, 100).await;

    // First reserves 2 of 10; second then wants 9 and is rejected.
    let responses = h.deliver_reserve_requests().await;
    assert_eq!(responses.len(), 2);
    for response in &responses {
        h.orchestrator.handle_response(response).await.unwrap();
    }

    let first_saga = h.store.saga_for_order(first.id).await.unwrap().unwrap();
    let second_saga = h.store.saga_for_order(second.id).await.unwrap().unwrap();
    assert_eq!(first_saga.status, SagaStatus::InProgress);
    assert_eq!(second_saga.status, SagaStatus::RolledBack);

    let failed = h.store.order(second.id).await.unwrap().unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);

    // Only the first saga's payment request is pending.
    let payment = h.payment_response(true);
    assert_eq!(payment.saga_id, first_saga.saga_id);
    h.orchestrator.handle_response(&payment).await.unwrap();
    h.deliver_completed_events().await;

    assert_eq!(h.stock("P1"), StockLevel::new(8, 0));
}
