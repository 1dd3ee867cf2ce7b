//! synapse integration tests, run against the in-memory broker.

mod support;
mod events;
mod reconnect;
mod topology;

#[cfg(feature = "http")]
mod http;
