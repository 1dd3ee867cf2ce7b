//! Message properties and inbound deliveries.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::BrokerError;

/// Broker message properties carried alongside the body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    pub content_type: Option<String>,
    /// The `type` property: event or action name.
    pub kind: Option<String>,
    /// Sender instance id.
    pub app_id: Option<String>,
    /// Sender application name, or a full reply routing key.
    pub reply_to: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn with_kind(mut self, value: impl Into<String>) -> Self {
        self.kind = Some(value.into());
        self
    }

    pub fn with_app_id(mut self, value: impl Into<String>) -> Self {
        self.app_id = Some(value.into());
        self
    }

    pub fn with_reply_to(mut self, value: impl Into<String>) -> Self {
        self.reply_to = Some(value.into());
        self
    }

    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = Some(value.into());
        self
    }

    pub fn with_correlation_id(mut self, value: impl Into<String>) -> Self {
        self.correlation_id = Some(value.into());
        self
    }

    pub fn kind(&self) -> Option<&str> {
        non_empty(&self.kind)
    }

    pub fn app_id(&self) -> Option<&str> {
        non_empty(&self.app_id)
    }

    pub fn reply_to(&self) -> Option<&str> {
        non_empty(&self.reply_to)
    }

    pub fn message_id(&self) -> Option<&str> {
        non_empty(&self.message_id)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        non_empty(&self.correlation_id)
    }
}

// Wire peers send empty strings for unset properties.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Settles deliveries on behalf of the session that received them.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to a consumer.
#[derive(Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// Set when this message was delivered before and requeued.
    pub redelivered: bool,
    pub properties: Properties,
    pub body: Vec<u8>,
    acker: Option<Arc<dyn Acker>>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        properties: Properties,
        body: Vec<u8>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
            properties,
            body,
            acker: None,
        }
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Attach the acker used by [`ack`](Self::ack) and [`reject`](Self::reject).
    /// Deliveries without one (auto-ack consumers) settle as no-ops.
    pub fn with_acker(mut self, acker: Arc<dyn Acker>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.ack(self.delivery_tag).await,
            None => Ok(()),
        }
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.reject(self.delivery_tag, requeue).await,
            None => Ok(()),
        }
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}
