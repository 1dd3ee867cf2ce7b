//! Connection loss, retries, fatal startup errors, and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use synapse_rust::broker::{ExchangeOptions, Properties};
use synapse_rust::{
    Broker, ConnectionState, Credentials, InMemoryBroker, Params, Synapse, SynapseError,
};

use crate::support::{config, eventually, start, SYS};

fn counting_synapse(broker: &InMemoryBroker, events: Arc<AtomicUsize>) -> Synapse {
    Synapse::new(config("orders"), broker.clone())
        .event("orders.created", move |_ctx| {
            events.fetch_add(1, Ordering::SeqCst);
            async move { true }
        })
        .rpc("ping", |_ctx| async move { Params::new() })
}

#[tokio::test]
async fn connection_drop_rebuilds_topology_without_duplicates() {
    let broker = InMemoryBroker::new();
    let events = Arc::new(AtomicUsize::new(0));
    let (handle, client) = start(counting_synapse(&broker, events.clone())).await;

    let bindings = broker.binding_count();
    let exchange_declarations = broker.exchange_declarations();
    assert_eq!(broker.connects(), 1);

    broker.drop_connections("broker restarted");
    eventually("reconnect", || broker.connects() == 2).await;
    tokio::time::timeout(Duration::from_secs(2), client.wait_ready())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(broker.binding_count(), bindings);
    assert_eq!(broker.exchange_declarations(), exchange_declarations + 1);
    assert_eq!(broker.open_connections(), 1);
    assert_eq!(broker.consumer_count("test_orders_event"), 1);
    assert_eq!(broker.consumer_count("test_server_orders"), 1);

    // Both roles work on the new generation.
    let result = client.send_rpc("orders", "ping", json!({})).await;
    assert_eq!(result["code"], 200);

    client.send_event("orders.created", json!({ "id": 7 })).await.unwrap();
    eventually("event after reconnect", || events.load(Ordering::SeqCst) == 1).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn unacked_event_is_redelivered_after_reconnect() {
    let broker = InMemoryBroker::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let synapse = Synapse::new(config("orders"), broker.clone()).event(
        "orders.created",
        move |_ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    // Hold the first delivery until the connection is gone.
                    std::future::pending::<()>().await;
                }
                true
            }
        },
    );
    let (handle, client) = start(synapse).await;

    client.send_event("orders.created", json!({})).await.unwrap();
    eventually("first attempt", || attempts.load(Ordering::SeqCst) == 1).await;
    assert_eq!(broker.unacked(), 1);

    broker.drop_connections("network blip");
    eventually("redelivery", || attempts.load(Ordering::SeqCst) == 2).await;
    eventually("ack", || broker.acked() == 1).await;
    assert_eq!(broker.unacked(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn refused_connections_are_retried() {
    let broker = InMemoryBroker::new();
    broker.refuse_connections(3);
    let synapse = Synapse::new(config("orders"), broker.clone());
    let (handle, client) = start(synapse).await;

    assert!(client.is_ready());
    assert_eq!(broker.connects(), 1);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn calls_fail_fast_while_disconnected() {
    let broker = InMemoryBroker::new();
    let synapse = Synapse::new(
        config("web").with_reconnect_delay(Duration::from_secs(60)),
        broker.clone(),
    );
    let (handle, client) = start(synapse).await;

    broker.drop_connections("gone");
    eventually("disconnected", || client.state() == ConnectionState::Disconnected).await;

    let result = client.send_rpc("calc", "ping", json!({})).await;
    assert_eq!(result["code"], 502);
    assert_eq!(client.pending_requests(), 0);
    assert!(matches!(
        client.send_event("x", json!({})).await,
        Err(SynapseError::NotConnected)
    ));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn missing_identity_is_fatal_before_connecting() {
    let broker = InMemoryBroker::new();
    let result = Synapse::new(config(""), broker.clone()).serve().await;
    assert!(matches!(result, Err(SynapseError::Config(_))));
    assert_eq!(broker.connects(), 0);
}

#[tokio::test]
async fn initial_topology_failure_is_fatal() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect(&Credentials::default()).await.unwrap();
    let session = conn.open_session().await.unwrap();
    session
        .declare_exchange(SYS, &ExchangeOptions::topic().with_auto_delete(true))
        .await
        .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        Synapse::new(config("orders"), broker.clone()).serve(),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(SynapseError::Topology(_))));
}

#[tokio::test]
async fn shutdown_closes_everything() {
    let broker = InMemoryBroker::new();
    let events = Arc::new(AtomicUsize::new(0));
    let synapse = counting_synapse(&broker, events);
    let shutdown = synapse.shutdown_handle();
    let mut state = synapse.watch_state();
    let task = tokio::spawn(synapse.serve());

    state
        .wait_for(|s| *s == ConnectionState::Ready)
        .await
        .unwrap();
    assert_eq!(broker.open_connections(), 1);

    shutdown.shutdown();
    assert!(shutdown.is_shutdown());
    task.await.unwrap().unwrap();

    assert_eq!(*state.borrow(), ConnectionState::Closing);
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(broker.consumer_count("test_orders_event"), 0);

    // Messages published after shutdown wait in the durable queue.
    broker
        .inject(
            SYS,
            "event.orders.created",
            Properties::new().with_kind("created"),
            b"{}".to_vec(),
        )
        .unwrap();
    assert_eq!(broker.queue_len("test_orders_event"), 1);
}
