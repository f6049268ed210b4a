//! Unit tests for the routing rules, driven through `Dispatcher::route`
//! without any transport.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use presence_ipc::events::{handler, ErrorContext, EventRegistry, EventSubscription};
use presence_ipc::models::message::Message;
use presence_ipc::protocol::dispatcher::{Dispatcher, Route};
use presence_ipc::AppError;

fn message(value: Value) -> Message {
    serde_json::from_value(value).expect("valid message")
}

fn dispatcher() -> (Arc<EventRegistry>, Dispatcher) {
    let registry = Arc::new(EventRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry), None);
    (registry, dispatcher)
}

async fn bind(registry: &EventRegistry, event: &str, seen: Arc<Mutex<Vec<Value>>>) {
    registry
        .insert(EventSubscription {
            event: event.to_owned(),
            args: json!({}),
            handler: handler(move |data| {
                seen.lock().unwrap().push(data);
                Ok(())
            }),
        })
        .await;
}

// ── Rule 1: ERROR ────────────────────────────────────────────────────────────

#[tokio::test]
async fn error_fails_head_even_when_verb_differs() {
    let (_registry, dispatcher) = dispatcher();
    let slot = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");

    let route = dispatcher
        .route(message(json!({
            "cmd": "SUBSCRIBE",
            "evt": "ERROR",
            "data": {"message": "bad args"}
        })))
        .await;

    assert_eq!(route, Route::Failed("n1".into()));
    let outcome = slot.await.expect("resolved");
    assert_eq!(outcome.unwrap_err(), AppError::ServerError("bad args".into()));
}

#[tokio::test]
async fn error_with_nothing_pending_is_unmatched() {
    let (_registry, dispatcher) = dispatcher();
    let route = dispatcher
        .route(message(json!({"cmd": "DISPATCH", "evt": "ERROR", "data": {}})))
        .await;
    assert_eq!(route, Route::UnmatchedError);
}

#[tokio::test]
async fn unmatched_error_reaches_error_handler() {
    let reports: Arc<Mutex<Vec<(AppError, ErrorContext)>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let dispatcher = Dispatcher::new(
        Arc::new(EventRegistry::new()),
        Some(Arc::new(move |err: &AppError, ctx: &ErrorContext| {
            sink.lock().unwrap().push((err.clone(), ctx.clone()));
        })),
    );

    dispatcher
        .route(message(json!({"evt": "ERROR", "message": "top-level text"})))
        .await;

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, AppError::ServerError("top-level text".into()));
    assert_eq!(reports[0].1.event, "ERROR");
}

// ── Rule 2: head verb match ──────────────────────────────────────────────────

#[tokio::test]
async fn matching_verb_resolves_only_the_head() {
    let (_registry, dispatcher) = dispatcher();
    let first = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");
    let _second = dispatcher.enqueue("SET_ACTIVITY", "n2").await.expect("enqueue");

    let route = dispatcher
        .route(message(json!({"cmd": "SET_ACTIVITY", "data": {}, "nonce": "n2"})))
        .await;

    assert_eq!(route, Route::Resolved("n1".into()));
    assert!(first.await.expect("resolved").is_ok());
    assert_eq!(dispatcher.pending_len().await, 1);
}

#[tokio::test]
async fn reply_for_second_verb_is_not_matched_past_head() {
    let (_registry, dispatcher) = dispatcher();
    let _first = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");
    let _second = dispatcher.enqueue("SUBSCRIBE", "n2").await.expect("enqueue");

    let route = dispatcher
        .route(message(json!({"cmd": "SUBSCRIBE", "evt": "ACTIVITY_JOIN", "data": {}})))
        .await;

    assert_eq!(route, Route::Dropped);
    assert_eq!(dispatcher.pending_len().await, 2);
}

/// A SUBSCRIBE ack carrying the bound event name is a command reply.
#[tokio::test]
async fn subscribe_ack_beats_event_delivery() {
    let (registry, dispatcher) = dispatcher();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bind(&registry, "ACTIVITY_JOIN", Arc::clone(&seen)).await;
    let _slot = dispatcher.enqueue("SUBSCRIBE", "n1").await.expect("enqueue");

    let route = dispatcher
        .route(message(json!({
            "cmd": "SUBSCRIBE",
            "evt": "ACTIVITY_JOIN",
            "data": {"evt": "ACTIVITY_JOIN"}
        })))
        .await;

    assert_eq!(route, Route::Resolved("n1".into()));
    assert!(seen.lock().unwrap().is_empty());
}

// ── Rule 3: dispatch delivery ────────────────────────────────────────────────

#[tokio::test]
async fn registered_dispatch_is_delivered_with_data() {
    let (registry, dispatcher) = dispatcher();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bind(&registry, "ACTIVITY_JOIN", Arc::clone(&seen)).await;
    let _slot = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");

    let route = dispatcher
        .route(message(json!({
            "cmd": "DISPATCH",
            "evt": "ACTIVITY_JOIN",
            "data": {"secret": "abc"}
        })))
        .await;

    assert_eq!(route, Route::Delivered("ACTIVITY_JOIN".into()));
    assert_eq!(*seen.lock().unwrap(), vec![json!({"secret": "abc"})]);
    assert_eq!(dispatcher.pending_len().await, 1, "pending command untouched");
}

#[tokio::test]
async fn failing_handler_is_still_delivered() {
    let (registry, dispatcher) = dispatcher();
    registry
        .insert(EventSubscription {
            event: "ACTIVITY_JOIN".into(),
            args: json!({}),
            handler: handler(|_| Err("nope".into())),
        })
        .await;

    let route = dispatcher
        .route(message(json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "data": {}})))
        .await;
    assert_eq!(route, Route::Delivered("ACTIVITY_JOIN".into()));
}

// ── Rule 4: drop ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unregistered_dispatch_is_dropped() {
    let (_registry, dispatcher) = dispatcher();
    let route = dispatcher
        .route(message(json!({"cmd": "DISPATCH", "evt": "ACTIVITY_SPECTATE", "data": {}})))
        .await;
    assert_eq!(route, Route::Dropped);
}

#[tokio::test]
async fn reply_with_nothing_pending_is_dropped() {
    let (_registry, dispatcher) = dispatcher();
    let route = dispatcher
        .route(message(json!({"cmd": "SET_ACTIVITY", "data": {}})))
        .await;
    assert_eq!(route, Route::Dropped);
}

// ── Queue lifecycle ──────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_fails_all_pending_and_refuses_new() {
    let (_registry, dispatcher) = dispatcher();
    let a = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");
    let b = dispatcher.enqueue("SUBSCRIBE", "n2").await.expect("enqueue");

    let reason = AppError::ConnectionClosed("server closed the channel".into());
    dispatcher.shutdown(reason.clone()).await;
    dispatcher
        .shutdown(AppError::ConnectionClosed("second reason ignored".into()))
        .await;

    assert_eq!(a.await.expect("resolved").unwrap_err(), reason);
    assert_eq!(b.await.expect("resolved").unwrap_err(), reason);
    assert_eq!(
        dispatcher.enqueue("SET_ACTIVITY", "n3").await.unwrap_err(),
        reason
    );
}

#[tokio::test]
async fn abandon_removes_only_that_entry() {
    let (_registry, dispatcher) = dispatcher();
    let _a = dispatcher.enqueue("SET_ACTIVITY", "n1").await.expect("enqueue");
    let _b = dispatcher.enqueue("SET_ACTIVITY", "n2").await.expect("enqueue");

    dispatcher.abandon("n1").await;

    assert_eq!(dispatcher.pending_len().await, 1);
    let route = dispatcher
        .route(message(json!({"cmd": "SET_ACTIVITY", "data": {}})))
        .await;
    assert_eq!(route, Route::Resolved("n2".into()));
}

/// A reply for a caller that gave up is consumed without disturbing the next.
#[tokio::test]
async fn reply_for_abandoned_waiter_is_discarded() {
    let (_registry, dispatcher) = dispatcher();
    drop(dispatcher.enqueue("SET_ACTIVITY", "gone").await.expect("enqueue"));
    let live = dispatcher.enqueue("SET_ACTIVITY", "live").await.expect("enqueue");

    let late = dispatcher
        .route(message(json!({"cmd": "SET_ACTIVITY", "data": {"tag": "late"}})))
        .await;
    assert_eq!(late, Route::Resolved("gone".into()));

    dispatcher
        .route(message(json!({"cmd": "SET_ACTIVITY", "data": {"tag": "live"}})))
        .await;
    let reply = live.await.expect("resolved").expect("ok");
    assert_eq!(reply.data, Some(json!({"tag": "live"})));
}
