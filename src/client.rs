//! Outbound side: publish events and call remote actions.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::broker::Session;
use crate::config::Config;
use crate::connection::ConnectionState;
use crate::error::SynapseError;
use crate::event::publisher;
use crate::message::{into_params, Params};
use crate::rpc::{client, reply, CorrelationTable};

/// Cheap, cloneable handle for sending events and RPC calls.
///
/// Usable from any task, including from inside handlers. Calls made while no
/// connection is ready fail fast rather than queueing.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<Config>,
    publisher: RwLock<Option<Arc<dyn Session>>>,
    pending: CorrelationTable,
    state: watch::Receiver<ConnectionState>,
}

impl Client {
    pub(crate) fn new(config: Arc<Config>, state: watch::Receiver<ConnectionState>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                publisher: RwLock::new(None),
                pending: CorrelationTable::new(),
                state,
            }),
        }
    }

    /// Publish an event. `params` must be a JSON object (or null).
    ///
    /// Does nothing when the event client is disabled.
    pub async fn send_event(&self, name: &str, params: Value) -> Result<(), SynapseError> {
        let config = &self.inner.config;
        if config.disable_event_client {
            warn!(event = %name, "event client disabled; event not sent");
            return Ok(());
        }
        let params = into_params(params)?;
        let session = self.publisher().ok_or(SynapseError::NotConnected)?;
        publisher::publish(session.as_ref(), config, name, &params).await
    }

    /// Call `action` on `app` and wait for the reply.
    ///
    /// Always returns a result map; failures carry a non-2xx `code`
    /// (503 client disabled, 502 publish failed, 504 timeout).
    pub async fn send_rpc(&self, app: &str, action: &str, params: Value) -> Params {
        let config = &self.inner.config;
        if config.disable_rpc_client {
            warn!(app = %app, action = %action, "rpc client disabled; request not sent");
            return reply::client_disabled();
        }
        let params = match into_params(params) {
            Ok(params) => params,
            Err(e) => return reply::invalid_params(e),
        };
        client::call(
            config,
            self.publisher(),
            &self.inner.pending,
            app,
            action,
            params,
        )
        .await
    }

    /// Wait until a connection is ready.
    pub async fn wait_ready(&self) -> Result<(), SynapseError> {
        let mut state = self.inner.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| SynapseError::NotConnected)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// RPC calls currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn app_id(&self) -> &str {
        &self.inner.config.app_id
    }

    pub(crate) fn correlation(&self) -> CorrelationTable {
        self.inner.pending.clone()
    }

    pub(crate) fn install(&self, session: Arc<dyn Session>) {
        *self
            .inner
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub(crate) fn clear(&self) {
        self.inner
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn publisher(&self) -> Option<Arc<dyn Session>> {
        self.inner
            .publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
