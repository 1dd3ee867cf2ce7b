//! Context passed to event and RPC handlers.
//!
//! Carries the decoded parameters plus the metadata of the delivery they
//! arrived on. Handlers read everything they need through the context.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::{Delivery, Properties};
use crate::error::SynapseError;
use crate::message::{Body, Params};

/// The context passed to every handler.
///
/// ## Example
///
/// ```ignore
/// async fn create(ctx: Context) -> Params {
///     let input = match ctx.input::<CreateOrder>() {
///         Ok(input) => input,
///         Err(e) => return reply(400, e.to_string()),
///     };
///     // ...
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Context {
    /// The event or action name being handled.
    name: String,
    params: Params,
    properties: Properties,
    routing_key: String,
    redelivered: bool,
    /// `from` of a legacy envelope.
    from: Option<String>,
}

impl Context {
    pub(crate) fn from_delivery(name: String, body: Body, delivery: &Delivery) -> Self {
        Self {
            name,
            params: body.params,
            properties: delivery.properties.clone(),
            routing_key: delivery.routing_key.clone(),
            redelivered: delivery.redelivered,
            from: body.from,
        }
    }

    /// A context not tied to a delivery, for calling handlers directly.
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
            properties: Properties::default(),
            routing_key: String::new(),
            redelivered: false,
            from: None,
        }
    }

    /// The event name (routing key without `event.`) or the RPC action.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deserialize the parameters into a typed struct.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, SynapseError> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| SynapseError::InvalidParams(e.to_string()))
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.params.get(field)
    }

    /// Check if the parameters contain a field.
    pub fn has_field(&self, field: &str) -> bool {
        self.params.contains_key(field)
    }

    /// Check if the parameters contain all specified fields.
    pub fn has_fields(&self, fields: &[&str]) -> bool {
        fields.iter().all(|f| self.has_field(f))
    }

    /// Application name of the sender, if it said.
    pub fn sender_app(&self) -> Option<&str> {
        self.properties
            .reply_to()
            .or_else(|| self.from.as_deref().map(|f| f.split('.').next().unwrap_or(f)))
    }

    /// Instance id of the sender, if it said.
    pub fn sender_id(&self) -> Option<&str> {
        self.properties
            .app_id()
            .or_else(|| self.from.as_deref().and_then(|f| f.split_once('.').map(|(_, id)| id)))
    }

    pub fn message_id(&self) -> Option<&str> {
        self.properties.message_id()
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// True when the broker delivered this message before.
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}
