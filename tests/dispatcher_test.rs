mod common;

use chrono::{Duration, Utc};
use common::*;
use shelf_pay::{
    domain::{
        error::{FulfillmentError, PipelineError},
        event::WebhookEvent,
        fulfillment::{Applied, FulfillmentQueue},
        ledger::{BoxFuture, IdempotencyLedger, Outcome},
        order::OrderStatus,
    },
    infra::memory::{MemoryLedger, MemoryOrderStore},
    services::{
        dispatcher::{DispatchOutcome, Dispatcher},
        fulfillment::FulfillmentExecutor,
    },
};
use std::sync::{Arc, Mutex};

fn event(id: &str, event_type: &str, object: serde_json::Value) -> WebhookEvent {
    WebhookEvent::new(event_id(id), event_type, object, 1_700_000_000, false, Utc::now())
}

fn completed(id: &str, order: &str) -> WebhookEvent {
    event(
        id,
        "checkout.session.completed",
        serde_json::json!({"payment_status": "paid", "metadata": {"order_id": order}}),
    )
}

struct Harness {
    dispatcher: Dispatcher,
    ledger: Arc<MemoryLedger>,
    orders: Arc<MemoryOrderStore>,
    store: Arc<CountingStore>,
}

fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedger::new(Duration::minutes(5)));
    let orders = Arc::new(MemoryOrderStore::new());
    let store = Arc::new(CountingStore::new(orders.clone()));
    let dispatcher = Dispatcher::new(ledger.clone(), FulfillmentExecutor::new(store.clone()));
    Harness {
        dispatcher,
        ledger,
        orders,
        store,
    }
}

#[derive(Default)]
struct RecordingQueue {
    queued: Mutex<Vec<String>>,
}

impl FulfillmentQueue for RecordingQueue {
    fn enqueue<'a>(&'a self, event: &'a WebhookEvent) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            self.queued.lock().unwrap().push(event.id().to_string());
            Ok(true)
        })
    }
}

struct BrokenQueue;

impl FulfillmentQueue for BrokenQueue {
    fn enqueue<'a>(&'a self, _event: &'a WebhookEvent) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async { Err(PipelineError::Database(sqlx::Error::PoolTimedOut)) })
    }
}

/// A queue whose job for the event is still pending or running.
struct BusyQueue;

impl FulfillmentQueue for BusyQueue {
    fn enqueue<'a>(&'a self, _event: &'a WebhookEvent) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async { Ok(false) })
    }
}

// ── Exactly-once ──────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_delivery_applies_once() {
    let h = harness();
    h.orders
        .insert_order(pending_order("ord_1", "user_1", &["book_1"]));
    let evt = completed("evt_rep", "ord_1");

    let first = h.dispatcher.dispatch(&evt).await.unwrap();
    assert!(matches!(
        first,
        DispatchOutcome::Fulfilled(Applied::Changed {
            from: OrderStatus::Pending,
            to: OrderStatus::Completed
        })
    ));

    for _ in 0..5 {
        let again = h.dispatcher.dispatch(&evt).await.unwrap();
        assert_eq!(again, DispatchOutcome::Duplicate);
    }

    assert_eq!(h.store.calls(), 1);
    assert_eq!(h.ledger.len(), 1);
}

#[tokio::test]
async fn unknown_kind_skips_ledger() {
    let h = harness();
    let evt = event("evt_unknown", "customer.created", serde_json::json!({}));

    let outcome = h.dispatcher.dispatch(&evt).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Ignored);
    assert_eq!(outcome.status(), "ignored");
    assert!(h.ledger.is_empty());
    assert_eq!(h.store.calls(), 0);
}

// ── Non-retryable outcomes ────────────────────────────────────────────────

#[tokio::test]
async fn unknown_order_is_skipped_and_recorded() {
    let h = harness();
    let evt = completed("evt_ghost", "ord_missing");

    let outcome = h.dispatcher.dispatch(&evt).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SkippedInvalidState);

    let record = h.ledger.get(evt.id()).await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(Outcome::Succeeded));

    // Redelivery is a duplicate, not a second attempt.
    let again = h.dispatcher.dispatch(&evt).await.unwrap();
    assert_eq!(again, DispatchOutcome::Duplicate);
    assert_eq!(h.store.calls(), 1);
}

#[tokio::test]
async fn event_without_order_reference_is_skipped() {
    let h = harness();
    let evt = event(
        "evt_noref",
        "checkout.session.completed",
        serde_json::json!({"payment_status": "paid"}),
    );

    let outcome = h.dispatcher.dispatch(&evt).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SkippedInvalidState);
    assert_eq!(outcome.status(), "ignored_invalid_state");
    assert_eq!(h.store.calls(), 0);
}

#[tokio::test]
async fn unpaid_checkout_waits_for_async_payment() {
    let h = harness();
    h.orders
        .insert_order(pending_order("ord_async", "user_a", &["book_1"]));

    let unpaid = event(
        "evt_unpaid",
        "checkout.session.completed",
        serde_json::json!({"payment_status": "unpaid", "metadata": {"order_id": "ord_async"}}),
    );
    let outcome = h.dispatcher.dispatch(&unpaid).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Fulfilled(Applied::NoEffect));
    assert_eq!(
        h.orders.order_status(&order_ref("ord_async")),
        Some(OrderStatus::Pending)
    );

    let paid = event(
        "evt_async_ok",
        "checkout.session.async_payment_succeeded",
        serde_json::json!({"metadata": {"order_id": "ord_async"}}),
    );
    h.dispatcher.dispatch(&paid).await.unwrap();
    assert_eq!(
        h.orders.order_status(&order_ref("ord_async")),
        Some(OrderStatus::Completed)
    );
    assert_eq!(h.orders.entitlements_for("user_a").len(), 1);
}

#[tokio::test]
async fn failed_payment_can_still_complete() {
    let h = harness();
    h.orders
        .insert_order(pending_order("ord_pf", "user_pf", &["book_1"]));

    let failed = event(
        "evt_pf_1",
        "payment_intent.payment_failed",
        serde_json::json!({"metadata": {"order_id": "ord_pf"}}),
    );
    h.dispatcher.dispatch(&failed).await.unwrap();
    assert_eq!(
        h.orders.order_status(&order_ref("ord_pf")),
        Some(OrderStatus::PaymentFailed)
    );
    assert_eq!(h.orders.notices().len(), 1);

    let succeeded = event(
        "evt_pf_2",
        "payment_intent.succeeded",
        serde_json::json!({"metadata": {"order_id": "ord_pf"}}),
    );
    h.dispatcher.dispatch(&succeeded).await.unwrap();
    assert_eq!(
        h.orders.order_status(&order_ref("ord_pf")),
        Some(OrderStatus::Completed)
    );
    assert_eq!(h.orders.held_quantity(&order_ref("ord_pf")), 0);
}

// ── Retryable failure ─────────────────────────────────────────────────────

#[tokio::test]
async fn downstream_error_releases_reservation() {
    let ledger = Arc::new(MemoryLedger::new(Duration::minutes(5)));
    let orders = Arc::new(MemoryOrderStore::new());
    orders.insert_order(pending_order("ord_f", "user_f", &["book_1"]));
    let flaky = Arc::new(FlakyStore::new(orders.clone(), 2));
    let dispatcher = Dispatcher::new(ledger.clone(), FulfillmentExecutor::new(flaky));
    let evt = completed("evt_flaky", "ord_f");

    for attempt in 1..=2 {
        let err = dispatcher.dispatch(&evt).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fulfillment(_)), "attempt {attempt}");
        let record = ledger.get(evt.id()).await.unwrap().unwrap();
        assert_eq!(record.outcome, Some(Outcome::Failed));
        assert_eq!(record.attempts, attempt);
    }

    let outcome = dispatcher.dispatch(&evt).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Fulfilled(_)));
    assert_eq!(
        orders.order_status(&order_ref("ord_f")),
        Some(OrderStatus::Completed)
    );
}

// ── Deferred mode ─────────────────────────────────────────────────────────

#[tokio::test]
async fn deferred_dispatch_enqueues_without_fulfilling() {
    let h = harness();
    let queue = Arc::new(RecordingQueue::default());
    let dispatcher = Dispatcher::new(
        h.ledger.clone(),
        FulfillmentExecutor::new(h.store.clone()),
    )
    .with_queue(queue.clone());
    h.orders
        .insert_order(pending_order("ord_d", "user_d", &["book_1"]));
    let evt = completed("evt_deferred", "ord_d");

    let outcome = dispatcher.dispatch(&evt).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Deferred);
    assert_eq!(outcome.status(), "accepted");
    assert_eq!(h.store.calls(), 0);
    assert_eq!(*queue.queued.lock().unwrap(), vec!["evt_deferred".to_string()]);

    // Reservation stays open until the worker reports back.
    let record = h.ledger.get(evt.id()).await.unwrap().unwrap();
    assert_eq!(record.outcome, None);
    assert_eq!(
        dispatcher.dispatch(&evt).await.unwrap(),
        DispatchOutcome::Duplicate
    );

    // What the worker does once it picks the job up.
    let outcome = dispatcher.fulfill_reserved(&evt).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Fulfilled(_)));
    let record = h.ledger.get(evt.id()).await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(Outcome::Succeeded));
}

#[tokio::test]
async fn enqueue_failure_releases_reservation() {
    let h = harness();
    let dispatcher = Dispatcher::new(
        h.ledger.clone(),
        FulfillmentExecutor::new(h.store.clone()),
    )
    .with_queue(Arc::new(BrokenQueue));
    let evt = completed("evt_noqueue", "ord_x");

    let err = dispatcher.dispatch(&evt).await.unwrap_err();
    assert!(matches!(err, PipelineError::Database(_)));
    let record = h.ledger.get(evt.id()).await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(Outcome::Failed));
}

#[tokio::test]
async fn job_already_queued_is_not_acknowledged() {
    let h = harness();
    let dispatcher = Dispatcher::new(
        h.ledger.clone(),
        FulfillmentExecutor::new(h.store.clone()),
    )
    .with_queue(Arc::new(BusyQueue));
    let evt = completed("evt_busy", "ord_x");

    let err = dispatcher.dispatch(&evt).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Fulfillment(FulfillmentError::DownstreamUnavailable(_))
    ));
    let record = h.ledger.get(evt.id()).await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(Outcome::Failed));
}

// ── Retention ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn purge_keeps_in_flight_reservations() {
    let h = harness();
    h.orders
        .insert_order(pending_order("ord_p", "user_p", &["book_1"]));
    h.dispatcher
        .dispatch(&completed("evt_done", "ord_p"))
        .await
        .unwrap();
    h.ledger
        .check_and_reserve(&event_id("evt_inflight"), "checkout.session.completed")
        .await
        .unwrap();

    let purged = h
        .ledger
        .purge_expired(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(h.ledger.get(&event_id("evt_done")).await.unwrap().is_none());
    assert!(h.ledger.get(&event_id("evt_inflight")).await.unwrap().is_some());
}
