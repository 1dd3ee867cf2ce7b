use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use super::correlation::CorrelationTable;
use super::reply;
use crate::broker::{DeliveryStream, Properties, Session};
use crate::config::Config;
use crate::error::SynapseError;
use crate::id::{random_id, ID_LEN};
use crate::message::{decode_reply, encode_params, server_key, Params, CONTENT_TYPE_JSON};

/// Publish one request and wait for its reply or the timeout.
pub(crate) async fn call(
    config: &Config,
    session: Option<Arc<dyn Session>>,
    table: &CorrelationTable,
    app: &str,
    action: &str,
    params: Params,
) -> Params {
    let pending = loop {
        if let Some(pending) = table.open(random_id(ID_LEN)) {
            break pending;
        }
    };
    let correlation_id = pending.id().to_string();

    let session = match session {
        Some(session) => session,
        None => return reply::publish_failed(SynapseError::NotConnected),
    };
    let body = match encode_params(&params) {
        Ok(body) => body,
        Err(e) => return reply::publish_failed(e),
    };
    let properties = Properties::new()
        .with_content_type(CONTENT_TYPE_JSON)
        .with_app_id(&config.app_id)
        .with_reply_to(&config.app_name)
        .with_message_id(&correlation_id)
        .with_kind(action);
    let routing_key = server_key(app);

    if config.debug {
        debug!(
            routing_key = %routing_key,
            correlation_id = %correlation_id,
            action = %action,
            params = %serde_json::Value::Object(params),
            "rpc request"
        );
    }

    if let Err(e) = session
        .publish(&config.sys_name, &routing_key, properties, body)
        .await
    {
        warn!(routing_key = %routing_key, error = %e, "rpc request publish failed");
        return reply::publish_failed(SynapseError::Broker(e));
    }

    match pending.wait(config.rpc_timeout).await {
        Some(result) => result,
        None => {
            warn!(
                routing_key = %routing_key,
                correlation_id = %correlation_id,
                action = %action,
                "rpc request timed out"
            );
            reply::timeout()
        }
    }
}

/// Resolve pending calls from the reply queue until the stream ends.
/// Replies nobody waits for are dropped.
pub(crate) async fn drain_replies(mut replies: DeliveryStream, table: CorrelationTable, debug: bool) {
    while let Some(delivery) = replies.next().await {
        let Some(correlation_id) = delivery.properties.correlation_id() else {
            debug!(routing_key = %delivery.routing_key, "reply without correlation id dropped");
            continue;
        };
        if !table.contains(correlation_id) {
            debug!(correlation_id = %correlation_id, "late or unknown reply dropped");
            continue;
        }
        let result = decode_reply(&delivery.body);
        if debug {
            debug!(
                correlation_id = %correlation_id,
                result = %serde_json::Value::Object(result.clone()),
                "rpc reply received"
            );
        }
        table.resolve(correlation_id, result);
    }
}
