//! Publish/subscribe of named events.
//!
//! Outbound events go to the system exchange as `event.{name}` (or
//! `event.{app}.{name}` with qualified addressing). Inbound events arrive on the
//! instance's `{sys}_{app}_event` queue and are dispatched by name.

pub(crate) mod publisher;
pub(crate) mod server;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;

/// A registered event handler. Return `true` to acknowledge the event,
/// `false` to have it redelivered.
pub type EventHandler = Arc<dyn Fn(Context) -> BoxFuture<'static, bool> + Send + Sync>;
