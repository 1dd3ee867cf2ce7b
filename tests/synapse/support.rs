//! Shared helpers: short timeouts, a started-synapse fixture, and polling.

use std::time::Duration;

use serde_json::Value;
use synapse_rust::{Client, Config, Params, ServeHandle, Synapse};

pub const SYS: &str = "test";

/// A config with timeouts short enough for tests.
pub fn config(app: &str) -> Config {
    Config::new(SYS, app)
        .with_rpc_timeout(Duration::from_millis(300))
        .with_reconnect_delay(Duration::from_millis(50))
}

/// Spawn `synapse` and wait until its first generation is ready.
pub async fn start(synapse: Synapse) -> (ServeHandle, Client) {
    let client = synapse.client();
    let handle = synapse.spawn();
    tokio::time::timeout(Duration::from_secs(2), client.wait_ready())
        .await
        .expect("synapse did not become ready")
        .expect("synapse state channel closed");
    (handle, client)
}

/// Poll `check` until it holds, panicking after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// `json!` object to params.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
