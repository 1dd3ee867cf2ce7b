//! Request/reply over the broker.
//!
//! The service side consumes `{sys}_server_{app}` and answers each request on
//! the caller's reply key. The client side publishes to `server.{app}`, parks
//! the caller on a correlation slot, and a drain task resolves slots from the
//! instance's reply queue.

pub(crate) mod client;
pub mod correlation;
pub mod reply;
pub(crate) mod server;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::message::Params;

pub use correlation::{CorrelationTable, PendingReply};
pub use reply::{code_of, normalize, reply, status_text};

/// A registered RPC action handler. Its result is normalized before it is sent.
pub type RpcHandler = Arc<dyn Fn(Context) -> BoxFuture<'static, Params> + Send + Sync>;
