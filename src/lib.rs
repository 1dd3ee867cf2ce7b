//! Event bus and RPC over a topic-routed message broker.
//!
//! Applications on one system share a topic exchange. Each instance
//! publishes and subscribes to named events, serves RPC actions from a queue
//! shared by all instances of its app, and calls other apps' actions with
//! replies matched back by correlation id.
//!
//! ```ignore
//! use serde_json::json;
//! use synapse_rust::{reply, Config, InMemoryBroker, Synapse};
//!
//! let broker = InMemoryBroker::new();
//! let synapse = Synapse::new(Config::new("shop", "orders"), broker)
//!     .event("web.login", |ctx| async move { ctx.has_field("user") })
//!     .rpc("ping", |_ctx| async move { reply(200, "pong") });
//!
//! let client = synapse.client();
//! let handle = synapse.spawn();
//! client.wait_ready().await?;
//!
//! client.send_event("order.created", json!({ "id": 42 })).await?;
//! let result = client.send_rpc("orders", "ping", json!({})).await;
//! assert_eq!(result["code"], 200);
//!
//! handle.stop().await?;
//! ```

pub mod broker;
mod client;
pub mod config;
pub mod connection;
mod context;
pub mod error;
pub mod event;
#[cfg(feature = "http")]
pub mod http;
pub mod id;
pub mod logging;
pub mod message;
pub mod registry;
pub mod rpc;
mod synapse;
pub mod topology;

#[cfg(feature = "amqp")]
pub use broker::AmqpBroker;
pub use broker::{Broker, Credentials, InMemoryBroker};
pub use client::Client;
pub use config::Config;
pub use connection::ConnectionState;
pub use context::Context;
pub use error::SynapseError;
pub use message::{EventAddressing, Params};
pub use rpc::reply;
pub use synapse::{ServeHandle, ShutdownHandle, Synapse};
