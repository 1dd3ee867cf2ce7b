//! Error type for broker operations.

use std::error::Error;
use std::fmt;

/// Error returned by a [`Broker`](super::Broker), [`Connection`](super::Connection)
/// or [`Session`](super::Session).
#[derive(Debug)]
pub enum BrokerError {
    /// Dialing the broker failed (refused, unreachable, bad credentials).
    ConnectionFailed(String),
    /// The connection was closed while the operation was in flight.
    ConnectionClosed(String),
    /// The session (channel) is closed.
    ChannelClosed,
    /// A declaration conflicts with an existing entity, or a delivery tag is unknown.
    PreconditionFailed(String),
    /// The referenced exchange or queue does not exist.
    NotFound(String),
    /// Other error
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            BrokerError::ConnectionClosed(msg) => write!(f, "connection closed: {}", msg),
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::PreconditionFailed(msg) => write!(f, "precondition failed: {}", msg),
            BrokerError::NotFound(msg) => write!(f, "not found: {}", msg),
            BrokerError::Other(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl BrokerError {
    /// Whether this error means the connection (or its channel) is gone and
    /// the stack must be rebuilt.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_)
                | BrokerError::ConnectionClosed(_)
                | BrokerError::ChannelClosed
        )
    }
}
