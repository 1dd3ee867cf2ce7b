use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::reply::{self, normalize};
use super::RpcHandler;
use crate::broker::{Delivery, DeliveryStream, Properties, Session};
use crate::config::Config;
use crate::context::Context;
use crate::error::SynapseError;
use crate::id::{random_id, ID_LEN};
use crate::message::{
    decode_body, encode_params, reply_key, Envelope, Params, CONTENT_TYPE_JSON,
    REPLY_ACTION_PREFIX,
};
use crate::registry::Registry;

/// Answers requests from the RPC-service queue.
pub(crate) struct RpcServer {
    config: Arc<Config>,
    handlers: Arc<Registry<RpcHandler>>,
    publisher: Arc<dyn Session>,
}

impl RpcServer {
    pub(crate) fn new(
        config: Arc<Config>,
        handlers: Arc<Registry<RpcHandler>>,
        publisher: Arc<dyn Session>,
    ) -> Self {
        Self {
            config,
            handlers,
            publisher,
        }
    }

    /// Serve until the stream ends. Each request runs on its own task;
    /// dropping this future aborts the ones still running.
    pub(crate) async fn run(self, mut deliveries: DeliveryStream) {
        let server = Arc::new(self);
        let mut tasks = JoinSet::new();
        while let Some(delivery) = deliveries.next().await {
            let server = server.clone();
            tasks.spawn(async move { server.handle(delivery).await });
            while tasks.try_join_next().is_some() {}
        }
        debug!(app = %server.config.app_name, "rpc consumer stream ended");
    }

    async fn handle(&self, delivery: Delivery) {
        let body = decode_body(&delivery.body, &delivery.properties);
        if body.malformed {
            warn!(
                routing_key = %delivery.routing_key,
                "rpc request body is not a JSON object; using empty params"
            );
        }
        let action = delivery
            .properties
            .kind()
            .map(str::to_string)
            .or_else(|| body.action.clone())
            .unwrap_or_default();
        let enveloped = delivery.properties.kind().is_none() && body.is_enveloped();

        let ctx = Context::from_delivery(action.clone(), body, &delivery);
        let sender_app = ctx.sender_app().map(str::to_string);
        let sender_id = ctx.sender_id().unwrap_or_default().to_string();

        if self.config.debug {
            debug!(
                action = %action,
                from = ?sender_app,
                params = %serde_json::Value::Object(ctx.params().clone()),
                "rpc request received"
            );
        }

        let result = match self.handlers.get(&action) {
            Some(handler) => {
                match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                    Ok(result) => normalize(result),
                    Err(_) => {
                        error!(action = %action, "rpc handler panicked");
                        reply::reply(500, reply::status_text(500))
                    }
                }
            }
            None => reply::not_found(),
        };

        match sender_app {
            Some(reply_to) => {
                let correlation_id = delivery
                    .properties
                    .message_id()
                    .or(delivery.properties.correlation_id())
                    .unwrap_or_default()
                    .to_string();
                self.respond(&reply_to, &sender_id, &action, &correlation_id, enveloped, result)
                    .await;
            }
            None => warn!(action = %action, "rpc request has no reply_to; dropping reply"),
        }

        if let Err(e) = delivery.ack().await {
            warn!(action = %action, error = %e, "rpc request ack failed");
        }
    }

    async fn respond(
        &self,
        reply_to: &str,
        sender_id: &str,
        action: &str,
        correlation_id: &str,
        enveloped: bool,
        result: Params,
    ) {
        let routing_key = reply_key(reply_to, sender_id);
        if self.config.debug {
            debug!(
                routing_key = %routing_key,
                correlation_id = %correlation_id,
                result = %serde_json::Value::Object(result.clone()),
                "rpc reply"
            );
        }

        let encoded = if enveloped {
            let envelope = Envelope {
                from: format!("{}.{}", self.config.app_name, self.config.app_id),
                to: reply_to.to_string(),
                action: format!("{}{}", REPLY_ACTION_PREFIX, action),
                params: result,
            };
            serde_json::to_vec(&envelope).map_err(SynapseError::from)
        } else {
            encode_params(&result)
        };
        let body = match encoded {
            Ok(body) => body,
            Err(e) => {
                error!(action = %action, error = %e, "rpc reply encode failed");
                return;
            }
        };

        let properties = Properties::new()
            .with_content_type(CONTENT_TYPE_JSON)
            .with_app_id(&self.config.app_id)
            .with_message_id(random_id(ID_LEN))
            .with_reply_to(&self.config.app_name)
            .with_kind(action)
            .with_correlation_id(correlation_id);

        if let Err(e) = self
            .publisher
            .publish(&self.config.sys_name, &routing_key, properties, body)
            .await
        {
            error!(routing_key = %routing_key, error = %e, "rpc reply publish failed");
        }
    }
}
