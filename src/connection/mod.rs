//! Broker connection lifecycle.
//!
//! ```text
//! Disconnected ──dial──▶ Connecting ──generation up──▶ Ready
//!      ▲                     │                           │
//!      └──── reconnect delay ┴──────── connection lost ──┘
//!
//! any state ──shutdown──▶ Closing
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::{Broker, BrokerError, Connection, Credentials};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Dials the broker and publishes the connection state.
pub(crate) struct ConnectionManager {
    broker: Arc<dyn Broker>,
    credentials: Credentials,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub(crate) fn new(
        broker: Arc<dyn Broker>,
        credentials: Credentials,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            credentials,
            reconnect_delay,
            state,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "connection state");
        }
    }

    pub(crate) async fn dial(&self) -> Result<Box<dyn Connection>, BrokerError> {
        self.set_state(ConnectionState::Connecting);
        info!(broker = %self.credentials.redacted_url(), "connecting");
        self.broker.connect(&self.credentials).await
    }

    /// Mark the connection lost and wait out the reconnect delay. Returns
    /// false if shutdown was requested meanwhile.
    pub(crate) async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        self.set_state(ConnectionState::Disconnected);
        error!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "broker unavailable; reconnecting after delay"
        );
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }
}
