use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::EventHandler;
use crate::broker::{Delivery, DeliveryStream};
use crate::context::Context;
use crate::message::{decode_body, event_name};
use crate::registry::Registry;

/// Dispatches deliveries from the event queue to handlers.
pub(crate) struct EventServer {
    handlers: Arc<Registry<EventHandler>>,
    debug: bool,
}

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Ack,
    Requeue,
    Discard,
}

impl EventServer {
    pub(crate) fn new(handlers: Arc<Registry<EventHandler>>, debug: bool) -> Self {
        Self { handlers, debug }
    }

    /// Serve until the stream ends. Each delivery runs on its own task;
    /// dropping this future aborts the ones still running.
    pub(crate) async fn run(self, mut deliveries: DeliveryStream) {
        let server = Arc::new(self);
        let mut tasks = JoinSet::new();
        while let Some(delivery) = deliveries.next().await {
            let server = server.clone();
            tasks.spawn(async move { server.handle(delivery).await });
            while tasks.try_join_next().is_some() {}
        }
        debug!("event consumer stream ended");
    }

    async fn handle(&self, delivery: Delivery) {
        let name = event_name(&delivery.routing_key).to_string();
        let outcome = self.dispatch(&name, &delivery).await;

        let settled = match outcome {
            Outcome::Ack => delivery.ack().await,
            Outcome::Requeue => delivery.reject(true).await,
            Outcome::Discard => delivery.reject(false).await,
        };
        if let Err(e) = settled {
            warn!(event = %name, ?outcome, error = %e, "event settle failed");
        }
    }

    async fn dispatch(&self, name: &str, delivery: &Delivery) -> Outcome {
        let Some(handler) = self.handlers.get(name) else {
            warn!(event = %name, "no handler for event; requeueing");
            return Outcome::Requeue;
        };

        let body = decode_body(&delivery.body, &delivery.properties);
        if body.malformed {
            warn!(event = %name, "event body is not a JSON object; using empty params");
        }
        if self.debug {
            debug!(
                event = %name,
                redelivered = delivery.redelivered,
                params = %serde_json::Value::Object(body.params.clone()),
                "event received"
            );
        }

        let ctx = Context::from_delivery(name.to_string(), body, delivery);
        match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
            Ok(true) => Outcome::Ack,
            Ok(false) => Outcome::Requeue,
            Err(_) => {
                error!(event = %name, "event handler panicked; discarding");
                Outcome::Discard
            }
        }
    }
}
