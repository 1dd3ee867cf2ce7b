use tracing::debug;

use crate::broker::{Properties, Session};
use crate::config::Config;
use crate::error::SynapseError;
use crate::id::{random_id, ID_LEN};
use crate::message::{encode_params, event_key, Params, CONTENT_TYPE_JSON};

/// Publish one event. Fire and forget: nothing waits for subscribers.
pub(crate) async fn publish(
    session: &dyn Session,
    config: &Config,
    name: &str,
    params: &Params,
) -> Result<(), SynapseError> {
    let routing_key = event_key(config.event_addressing, &config.app_name, name);
    let body = encode_params(params)?;
    let properties = Properties::new()
        .with_content_type(CONTENT_TYPE_JSON)
        .with_app_id(&config.app_id)
        .with_message_id(random_id(ID_LEN))
        .with_reply_to(&config.app_name)
        .with_kind(name);

    if config.debug {
        debug!(
            routing_key = %routing_key,
            params = %serde_json::Value::Object(params.clone()),
            "event published"
        );
    }

    session
        .publish(&config.sys_name, &routing_key, properties, body)
        .await?;
    Ok(())
}
