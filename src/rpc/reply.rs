//! RPC result maps.
//!
//! Every RPC result is a JSON object with at least an integer `code` and a
//! `message`. Failures the caller cannot avoid (unknown action, timeout,
//! disabled client) are encoded here instead of as errors.

use http::StatusCode;
use serde_json::Value;

use crate::message::Params;

pub const NOT_FOUND_MESSAGE: &str = "The Rpc Action Not Found";
pub const TIMEOUT_MESSAGE: &str = "Rpc Request Not Success: Request Timeout";
pub const CLIENT_DISABLED_MESSAGE: &str = "Rpc Client Disabled";

/// A result map with just `code` and `message`.
pub fn reply(code: u16, message: impl Into<String>) -> Params {
    let mut map = Params::new();
    map.insert("code".into(), Value::from(code));
    map.insert("message".into(), Value::String(message.into()));
    map
}

/// Canonical reason phrase for a status code; empty when there is none.
pub fn status_text(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Merge a handler result over `{code: 200, message: "OK"}`.
///
/// A handler that sets `code` without `message` gets the reason phrase for
/// that code.
pub fn normalize(result: Params) -> Params {
    let mut base = reply(200, status_text(200));
    if !result.contains_key("message") {
        if let Some(code) = result.get("code").and_then(code_value) {
            base.insert("message".into(), Value::from(status_text(code)));
        }
    }
    base.extend(result);
    base
}

/// The `code` of a result map, if it is a valid status code.
pub fn code_of(result: &Params) -> Option<u16> {
    result.get("code").and_then(code_value)
}

fn code_value(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|c| u16::try_from(c).ok())
}

pub fn not_found() -> Params {
    reply(404, NOT_FOUND_MESSAGE)
}

pub fn timeout() -> Params {
    reply(504, TIMEOUT_MESSAGE)
}

pub fn client_disabled() -> Params {
    reply(503, CLIENT_DISABLED_MESSAGE)
}

pub fn publish_failed(err: impl std::fmt::Display) -> Params {
    reply(502, format!("Rpc Request Not Success: {}", err))
}

pub fn invalid_params(err: impl std::fmt::Display) -> Params {
    reply(400, format!("Rpc Request Not Success: {}", err))
}
