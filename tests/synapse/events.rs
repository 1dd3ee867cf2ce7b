//! Event publish/subscribe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use synapse_rust::broker::Properties;
use synapse_rust::{Context, EventAddressing, InMemoryBroker, Synapse};

use crate::support::{config, eventually, params, start, SYS};

type Seen = Arc<Mutex<Vec<Context>>>;

fn recorder() -> (Seen, impl Fn(Context) -> futures::future::Ready<bool> + Send + Sync + 'static) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let handler = move |ctx: Context| {
        sink.lock().unwrap().push(ctx);
        futures::future::ready(true)
    };
    (seen, handler)
}

#[tokio::test]
async fn event_reaches_handler_registered_under_its_name() {
    let broker = InMemoryBroker::recording();
    let (seen, handler) = recorder();
    let synapse = Synapse::new(config("orders"), broker.clone()).event("order.created", handler);
    let (handle, client) = start(synapse).await;

    client
        .send_event("order.created", json!({ "id": 42 }))
        .await
        .unwrap();

    eventually("event delivery", || seen.lock().unwrap().len() == 1).await;
    eventually("ack", || broker.acked() == 1).await;
    assert_eq!(broker.published_to("event.order.created").len(), 1);

    let ctx = seen.lock().unwrap()[0].clone();
    assert_eq!(ctx.name(), "order.created");
    assert_eq!(ctx.params(), &params(json!({ "id": 42 })));
    assert_eq!(ctx.sender_app(), Some("orders"));
    assert_eq!(ctx.sender_id(), Some(client.app_id()));
    assert_eq!(broker.unacked(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn qualified_events_are_addressed_by_publisher_app() {
    let broker = InMemoryBroker::recording();
    let (seen, handler) = recorder();
    let audit = Synapse::new(config("audit"), broker.clone()).event("web.login", handler);
    let web = Synapse::new(
        config("web").with_event_addressing(EventAddressing::Qualified),
        broker.clone(),
    );

    let (audit_handle, _) = start(audit).await;
    let (web_handle, web_client) = start(web).await;

    web_client
        .send_event("login", json!({ "user": "ada" }))
        .await
        .unwrap();
    web_client
        .send_event("logout", json!({ "user": "ada" }))
        .await
        .unwrap();

    eventually("login delivery", || seen.lock().unwrap().len() == 1).await;
    let published = broker.published_to("event.web.login");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].properties.kind(), Some("login"));
    assert_eq!(published[0].properties.reply_to(), Some("web"));

    let ctx = seen.lock().unwrap()[0].clone();
    assert_eq!(ctx.name(), "web.login");
    assert_eq!(ctx.get("user"), Some(&json!("ada")));
    assert_eq!(ctx.routing_key(), "event.web.login");

    // Nothing is bound for logout.
    assert_eq!(broker.queue_len("test_audit_event"), 0);
    assert_eq!(seen.lock().unwrap().len(), 1);

    web_handle.stop().await.unwrap();
    audit_handle.stop().await.unwrap();
}

#[tokio::test]
async fn wildcard_handler_catches_every_event() {
    let broker = InMemoryBroker::new();
    let (seen, wildcard) = recorder();
    let (named_seen, named) = recorder();
    let synapse = Synapse::new(config("audit"), broker.clone())
        .event("billing.paid", named)
        .event("*", wildcard);
    let (handle, _) = start(synapse).await;

    assert_eq!(
        broker.bindings_for("test_audit_event"),
        vec!["event.billing.paid", "event.#"]
    );

    let qualified = |app: &str| config(app).with_event_addressing(EventAddressing::Qualified);
    let web = Synapse::new(qualified("web"), broker.clone());
    let (web_handle, web_client) = start(web).await;
    web_client.send_event("login", json!({})).await.unwrap();

    let billing = Synapse::new(qualified("billing"), broker.clone());
    let (billing_handle, billing_client) = start(billing).await;
    billing_client
        .send_event("paid", json!({ "amount": 10 }))
        .await
        .unwrap();

    eventually("wildcard delivery", || seen.lock().unwrap().len() == 1).await;
    eventually("named delivery", || named_seen.lock().unwrap().len() == 1).await;
    assert_eq!(seen.lock().unwrap()[0].name(), "web.login");
    assert_eq!(named_seen.lock().unwrap()[0].name(), "billing.paid");

    billing_handle.stop().await.unwrap();
    web_handle.stop().await.unwrap();
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_event_is_redelivered_to_same_handler() {
    let broker = InMemoryBroker::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let redelivered = Arc::new(Mutex::new(Vec::new()));

    let counter = attempts.clone();
    let flags = redelivered.clone();
    let synapse = Synapse::new(config("orders"), broker.clone()).event(
        "orders.created",
        move |ctx: Context| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            flags.lock().unwrap().push(ctx.is_redelivered());
            async move { n > 0 }
        },
    );
    let (handle, client) = start(synapse).await;

    client
        .send_event("orders.created", json!({ "id": 1 }))
        .await
        .unwrap();

    eventually("second attempt", || attempts.load(Ordering::SeqCst) == 2).await;
    eventually("ack", || broker.acked() == 1).await;
    assert_eq!(broker.rejected(), 1);
    assert_eq!(*redelivered.lock().unwrap(), vec![false, true]);
    assert_eq!(broker.unacked(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_and_enveloped_bodies() {
    let broker = InMemoryBroker::new();
    let (seen, handler) = recorder();
    let synapse = Synapse::new(config("audit"), broker.clone()).event("web.login", handler);
    let (handle, _) = start(synapse).await;

    broker
        .inject(
            SYS,
            "event.web.login",
            Properties::new().with_kind("login"),
            b"{not json".to_vec(),
        )
        .unwrap();
    eventually("malformed delivery", || seen.lock().unwrap().len() == 1).await;
    assert!(seen.lock().unwrap()[0].params().is_empty());

    let envelope = json!({
        "from": "web.node1",
        "to": "audit",
        "action": "login",
        "params": { "user": "ada" }
    });
    broker
        .inject(
            SYS,
            "event.web.login",
            Properties::new(),
            serde_json::to_vec(&envelope).unwrap(),
        )
        .unwrap();
    eventually("enveloped delivery", || seen.lock().unwrap().len() == 2).await;

    let ctx = seen.lock().unwrap()[1].clone();
    assert_eq!(ctx.params(), &params(json!({ "user": "ada" })));
    assert_eq!(ctx.sender_app(), Some("web"));
    assert_eq!(ctx.sender_id(), Some("node1"));
    eventually("both acked", || broker.acked() == 2).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn disabled_event_client_publishes_nothing() {
    let broker = InMemoryBroker::recording();
    let synapse = Synapse::new(config("web").with_event_client_disabled(true), broker.clone());
    let (handle, client) = start(synapse).await;

    client.send_event("login", json!({ "a": 1 })).await.unwrap();
    assert!(broker.published_to("event.login").is_empty());
    assert!(broker.published().is_empty());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn pattern_subscription_dispatches_matching_events() {
    let broker = InMemoryBroker::new();
    let (seen, handler) = recorder();
    let synapse = Synapse::new(config("audit"), broker.clone()).event("web.*", handler);
    let (handle, client) = start(synapse).await;
    assert_eq!(broker.bindings_for("test_audit_event"), vec!["event.web.*"]);

    client.send_event("web.login", json!({})).await.unwrap();
    client.send_event("web.logout", json!({})).await.unwrap();
    client.send_event("web.user.deleted", json!({})).await.unwrap();

    eventually("both matches delivered", || seen.lock().unwrap().len() == 2).await;
    eventually("acked", || broker.acked() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(broker.rejected(), 0);
    assert_eq!(broker.unacked(), 0);

    let mut names: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|ctx| ctx.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["web.login", "web.logout"]);

    handle.stop().await.unwrap();
}
