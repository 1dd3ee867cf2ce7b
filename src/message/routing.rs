//! Routing keys and queue names.
//!
//! | what          | routing key                 | queue                         |
//! |---------------|-----------------------------|-------------------------------|
//! | event         | `event.{name}`              | `{sys}_{app}_event`           |
//! | rpc request   | `server.{app}`              | `{sys}_server_{app}`          |
//! | rpc reply     | `client.{app}.{app_id}`     | `{sys}_{app}_client_{app_id}` |

pub const EVENT_PREFIX: &str = "event.";
pub const SERVER_PREFIX: &str = "server.";
pub const CLIENT_PREFIX: &str = "client.";
/// Older peers ask for replies on `rpc.cli.{app}.{app_id}`.
pub const LEGACY_CLIENT_PREFIX: &str = "rpc.cli.";

/// Handler name that catches every event or action without its own handler.
pub const WILDCARD: &str = "*";

/// How outbound events are addressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventAddressing {
    /// `event.{name}`; subscribers register `"{name}"`.
    #[default]
    Global,
    /// `event.{app}.{name}`; subscribers register `"{app}.{name}"`. Matches
    /// peers that prefix events with the publishing app.
    Qualified,
}

pub fn event_key(addressing: EventAddressing, app: &str, name: &str) -> String {
    match addressing {
        EventAddressing::Qualified => format!("{}{}.{}", EVENT_PREFIX, app, name),
        EventAddressing::Global => format!("{}{}", EVENT_PREFIX, name),
    }
}

/// Binding key for a registered event handler. The wildcard binds every event.
pub fn event_binding(name: &str) -> String {
    if name == WILDCARD {
        format!("{}#", EVENT_PREFIX)
    } else {
        format!("{}{}", EVENT_PREFIX, name)
    }
}

/// The event name carried by a routing key.
pub fn event_name(routing_key: &str) -> &str {
    routing_key.strip_prefix(EVENT_PREFIX).unwrap_or(routing_key)
}

pub fn server_key(app: &str) -> String {
    format!("{}{}", SERVER_PREFIX, app)
}

pub fn client_key(app: &str, app_id: &str) -> String {
    format!("{}{}.{}", CLIENT_PREFIX, app, app_id)
}

/// Where to send the reply for a request.
///
/// `reply_to` is normally the caller's app name; peers that put a full reply
/// key there get it back verbatim.
pub fn reply_key(reply_to: &str, app_id: &str) -> String {
    if reply_to.starts_with(CLIENT_PREFIX) || reply_to.starts_with(LEGACY_CLIENT_PREFIX) {
        reply_to.to_string()
    } else {
        client_key(reply_to, app_id)
    }
}

pub fn event_queue(sys: &str, app: &str) -> String {
    format!("{}_{}_event", sys, app)
}

pub fn server_queue(sys: &str, app: &str) -> String {
    format!("{}_server_{}", sys, app)
}

pub fn reply_queue(sys: &str, app: &str, app_id: &str) -> String {
    format!("{}_{}_client_{}", sys, app, app_id)
}
