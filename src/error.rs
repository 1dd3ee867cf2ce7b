use std::fmt;

use crate::broker::BrokerError;

/// Error type for synapse operations.
///
/// Application-level RPC failures (unknown action, handler-reported error,
/// timeout) are not errors: they come back as reply maps with a non-2xx
/// `code`. This type covers what cannot be expressed that way.
#[derive(Debug)]
pub enum SynapseError {
    /// Required identity or configuration is missing or invalid. Fatal.
    Config(String),
    /// Connectivity, channel, or publish failure.
    Broker(BrokerError),
    /// Exchange/queue/binding declaration failed.
    Topology(BrokerError),
    /// No broker connection is ready to publish on.
    NotConnected,
    /// Parameters must be a JSON object.
    InvalidParams(String),
    /// JSON encoding failed.
    Encode(serde_json::Error),
    /// The serve task ended abnormally.
    Task(String),
}

impl fmt::Display for SynapseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynapseError::Config(msg) => write!(f, "configuration error: {}", msg),
            SynapseError::Broker(e) => write!(f, "broker error: {}", e),
            SynapseError::Topology(e) => write!(f, "topology declaration failed: {}", e),
            SynapseError::NotConnected => write!(f, "not connected to broker"),
            SynapseError::InvalidParams(msg) => write!(f, "invalid params: {}", msg),
            SynapseError::Encode(e) => write!(f, "encode failed: {}", e),
            SynapseError::Task(msg) => write!(f, "serve task failed: {}", msg),
        }
    }
}

impl std::error::Error for SynapseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynapseError::Broker(e) | SynapseError::Topology(e) => Some(e),
            SynapseError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BrokerError> for SynapseError {
    fn from(err: BrokerError) -> Self {
        SynapseError::Broker(err)
    }
}

impl From<serde_json::Error> for SynapseError {
    fn from(err: serde_json::Error) -> Self {
        SynapseError::Encode(err)
    }
}
