use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn test_publish_delivers_to_subscriber() {
    let bus = InProcEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    bus.subscribe(
        "orders",
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    bus.publish("orders", json!({"id": 1})).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_topics_match_exactly() {
    let bus = InProcEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    bus.subscribe(
        "orders",
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    bus.publish("orders.created", json!({})).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_subscribers_receive_event() {
    let bus = InProcEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let counter = count.clone();
        bus.subscribe(
            "fanout",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    }

    bus.publish("fanout", json!(null)).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = InProcEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let id = bus
        .subscribe(
            "t",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    bus.publish("t", json!(1)).await.unwrap();
    bus.unsubscribe(id).await.unwrap();
    bus.publish("t", json!(2)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsubscribe_unknown_id_is_noop() {
    let bus = InProcEventBus::new();
    assert!(bus.unsubscribe(Uuid::new_v4()).await.is_ok());
}

#[tokio::test]
async fn test_unsubscribe_only_removes_one_subscription() {
    let bus = InProcEventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let c1 = count.clone();
    let id1 = bus
        .subscribe(
            "t",
            Arc::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    let c2 = count.clone();
    bus.subscribe(
        "t",
        Arc::new(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    bus.unsubscribe(id1).await.unwrap();
    bus.publish("t", json!(null)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_publish_without_subscribers_succeeds() {
    let bus = InProcEventBus::new();
    assert!(bus.publish("silence", json!({})).await.is_ok());
}

#[tokio::test]
async fn test_payload_reaches_subscriber_intact() {
    let bus = InProcEventBus::new();
    let received = Arc::new(parking_lot::Mutex::new(None));

    let slot = received.clone();
    bus.subscribe(
        "t",
        Arc::new(move |payload| {
            *slot.lock() = Some(payload);
        }),
    )
    .await
    .unwrap();

    bus.publish("t", json!({"k": [1, 2, 3]})).await.unwrap();
    assert_eq!(received.lock().take().unwrap(), json!({"k": [1, 2, 3]}));
}
