//! HTTP bridge: exposes a [`Client`] to callers that cannot reach the broker.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /health`: `{ "ok": <ready>, "state": "...", "app": "...", "app_id": "..." }`.
//! - `POST /event/:name`: publish the JSON body as event `name`. 202 on success.
//! - `POST /rpc/:app/:action`: call `action` on `app` with the JSON body. The
//!   HTTP status mirrors the reply `code`.
//!
//! ## Example
//!
//! ```ignore
//! let synapse = Synapse::new(config, broker);
//! let client = synapse.client();
//! let handle = synapse.spawn();
//!
//! synapse_rust::http::serve(client, "0.0.0.0:3000").await?;
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::client::Client;
use crate::error::SynapseError;
use crate::rpc::code_of;

/// Build an axum `Router` that forwards requests through the given client.
pub fn router(client: Client) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/event/:name", post(event_handler))
        .route("/rpc/:app/:action", post(rpc_handler))
        .with_state(client)
}

/// Serve the bridge at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(client: Client, addr: &str) -> Result<(), std::io::Error> {
    let app = router(client);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health_handler(State(client): State<Client>) -> impl IntoResponse {
    let status = if client.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "ok": client.is_ready(),
        "state": client.state().to_string(),
        "app": client.config().app_name,
        "app_id": client.app_id(),
    });
    (status, Json(body))
}

async fn event_handler(
    State(client): State<Client>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> impl IntoResponse {
    match client.send_event(&name, params).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "ok": true }))).into_response(),
        Err(e) => {
            let status = match e {
                SynapseError::InvalidParams(_) => StatusCode::BAD_REQUEST,
                SynapseError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn rpc_handler(
    State(client): State<Client>,
    Path((app, action)): Path<(String, String)>,
    Json(params): Json<Value>,
) -> impl IntoResponse {
    let result = client.send_rpc(&app, &action, params).await;
    let status = code_of(&result)
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    (status, Json(Value::Object(result)))
}
