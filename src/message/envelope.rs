//! Body codec.
//!
//! The canonical body is a bare JSON object of parameters, with the event or
//! action name in the `type` property. Older peers wrap it instead:
//!
//! ```json
//! { "from": "web.abc", "to": "orders", "action": "ping", "params": { } }
//! ```
//!
//! Both are accepted on every inbound path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Params;
use crate::broker::Properties;
use crate::error::SynapseError;

/// Prefix on the `action` of an enveloped reply.
pub const REPLY_ACTION_PREFIX: &str = "reply-";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

/// A decoded inbound body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    pub params: Params,
    /// Set when the body was an envelope.
    pub action: Option<String>,
    pub from: Option<String>,
    /// The body was not a JSON object; `params` is empty.
    pub malformed: bool,
}

impl Body {
    pub fn is_enveloped(&self) -> bool {
        self.action.is_some()
    }
}

pub fn encode_params(params: &Params) -> Result<Vec<u8>, SynapseError> {
    Ok(serde_json::to_vec(params)?)
}

/// Wrap a non-object value as params. `null` becomes the empty map.
pub fn into_params(value: Value) -> Result<Params, SynapseError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(SynapseError::InvalidParams(format!(
            "params must be a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

/// Decode a request or event body.
///
/// A body is read as an envelope only when the `type` property is absent and
/// the JSON has an `action` string and an object `params`.
pub fn decode_body(body: &[u8], properties: &Properties) -> Body {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Body::default();
    }
    let map = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => {
            return Body {
                malformed: true,
                ..Default::default()
            }
        }
    };
    if properties.kind().is_none() && looks_enveloped(&map) {
        if let Ok(envelope) = serde_json::from_value::<Envelope>(Value::Object(map.clone())) {
            return Body {
                params: envelope.params,
                action: Some(envelope.action),
                from: Some(envelope.from).filter(|f| !f.is_empty()),
                malformed: false,
            };
        }
    }
    Body {
        params: map,
        ..Default::default()
    }
}

/// Decode a reply body, unwrapping a `reply-*` envelope.
pub fn decode_reply(body: &[u8]) -> Params {
    let map = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => return Params::new(),
    };
    let is_reply_envelope = map
        .get("action")
        .and_then(Value::as_str)
        .is_some_and(|a| a.starts_with(REPLY_ACTION_PREFIX));
    if is_reply_envelope {
        if let Some(Value::Object(params)) = map.get("params") {
            return params.clone();
        }
    }
    map
}

fn looks_enveloped(map: &Params) -> bool {
    matches!(map.get("action"), Some(Value::String(_)))
        && matches!(map.get("params"), Some(Value::Object(_)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
