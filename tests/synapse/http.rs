//! HTTP bridge integration tests.
//!
//! Starts an axum server in front of a client and exercises it with reqwest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use synapse_rust::{http, Client, Context, InMemoryBroker, Synapse};

use crate::support::{config, eventually, params, start};

/// Bind to port 0 and return the actual address.
async fn start_server(client: Client) -> String {
    let app = http::router(client);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_reports_state() {
    let synapse = Synapse::new(config("gateway"), InMemoryBroker::new());
    let (handle, client) = start(synapse).await;
    let base = start_server(client.clone()).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["app"], "gateway");
    assert_eq!(body["app_id"], client.app_id());

    handle.stop().await.unwrap();
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn rpc_and_events_through_http() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let backend = Synapse::new(config("calc"), broker.clone())
        .rpc("echo", |ctx: Context| async move { ctx.into_params() })
        .event("hit", move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { true }
        });
    let (backend_handle, _) = start(backend).await;
    let (gateway_handle, gateway) = start(Synapse::new(config("gateway"), broker)).await;
    let base = start_server(gateway).await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{base}/rpc/calc/echo"))
        .json(&json!({ "x": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::Value::Object(params(json!({ "code": 200, "message": "OK", "x": 1 })))
    );

    let resp = http
        .post(format!("{base}/rpc/calc/missing"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = http
        .post(format!("{base}/event/hit"))
        .json(&json!({ "path": "/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    eventually("event", || seen.load(Ordering::SeqCst) == 1).await;

    let resp = http
        .post(format!("{base}/event/hit"))
        .json(&json!([1, 2]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    gateway_handle.stop().await.unwrap();
    backend_handle.stop().await.unwrap();
}
