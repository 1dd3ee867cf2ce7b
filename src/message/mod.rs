//! Wire conventions: routing keys, queue names, and the body codec.

mod envelope;
mod routing;

pub use envelope::{
    decode_body, decode_reply, encode_params, into_params, Body, Envelope, REPLY_ACTION_PREFIX,
};
pub use routing::{
    client_key, event_binding, event_key, event_name, event_queue, reply_key, reply_queue,
    server_key, server_queue, EventAddressing, CLIENT_PREFIX, EVENT_PREFIX, LEGACY_CLIENT_PREFIX,
    SERVER_PREFIX, WILDCARD,
};

/// Event and RPC parameters: a JSON object.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// `Content-Type` set on everything this crate publishes.
pub const CONTENT_TYPE_JSON: &str = "application/json";
