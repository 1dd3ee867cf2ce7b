//! Declared layout on the broker.

use serde_json::json;
use synapse_rust::broker::ExchangeKind;
use synapse_rust::topology::{Role, Topology};
use synapse_rust::{InMemoryBroker, Params, Synapse};

use crate::support::{config, start};

fn orders(broker: &InMemoryBroker, app_id: &str) -> Synapse {
    Synapse::new(config("orders").with_app_id(app_id), broker.clone())
        .event("web.login", |_ctx| async move { true })
        .rpc("ping", |_ctx| async move { Params::new() })
}

#[tokio::test]
async fn declares_exchange_queues_and_bindings() {
    let broker = InMemoryBroker::new();
    let (handle, _) = start(orders(&broker, "node1")).await;

    let exchange = broker.exchange_options("test").unwrap();
    assert_eq!(exchange.kind, ExchangeKind::Topic);
    assert!(exchange.durable);
    assert!(!exchange.auto_delete);

    assert_eq!(
        broker.queue_names(),
        vec![
            "test_orders_client_node1",
            "test_orders_event",
            "test_server_orders",
        ]
    );
    assert_eq!(broker.bindings_for("test_orders_event"), vec!["event.web.login"]);
    assert_eq!(broker.bindings_for("test_server_orders"), vec!["server.orders"]);
    assert_eq!(
        broker.bindings_for("test_orders_client_node1"),
        vec!["client.orders.node1"]
    );

    let event = broker.queue_options("test_orders_event").unwrap();
    assert!(event.durable && !event.auto_delete);
    let reply = broker.queue_options("test_orders_client_node1").unwrap();
    assert!(reply.durable && reply.auto_delete);

    handle.stop().await.unwrap();
    // The reply queue goes with its only consumer.
    assert!(!broker.has_queue("test_orders_client_node1"));
    assert!(broker.has_queue("test_server_orders"));
}

#[tokio::test]
async fn instances_share_the_rpc_queue() {
    let broker = InMemoryBroker::new();
    let (first, client) = start(orders(&broker, "node1")).await;
    let (second, _) = start(orders(&broker, "node2")).await;

    assert_eq!(broker.consumer_count("test_server_orders"), 2);
    assert_eq!(broker.consumer_count("test_orders_event"), 2);
    assert!(broker.has_queue("test_orders_client_node1"));
    assert!(broker.has_queue("test_orders_client_node2"));
    assert_eq!(broker.bindings_for("test_server_orders"), vec!["server.orders"]);

    for _ in 0..4 {
        let result = client.send_rpc("orders", "ping", json!({})).await;
        assert_eq!(result["code"], 200);
    }

    second.stop().await.unwrap();
    first.stop().await.unwrap();
}

#[test]
fn plan_matches_registered_handlers() {
    let synapse = Synapse::new(config("orders").with_app_id("n"), InMemoryBroker::new())
        .event("web.login", |_ctx| async move { true })
        .event("*", |_ctx| async move { false });
    assert_eq!(synapse.event_names(), vec!["web.login", "*"]);
    assert!(synapse.actions().is_empty());

    let plan = Topology::plan(synapse.config(), &synapse.event_names(), false);
    assert!(plan.queue(Role::RpcServer).is_none());
    assert_eq!(
        plan.queue(Role::Event).unwrap().bindings,
        vec!["event.web.login", "event.#"]
    );
    assert_eq!(
        plan.queue(Role::RpcReply).unwrap().consume.consumer_tag,
        "client.orders.n"
    );
}
