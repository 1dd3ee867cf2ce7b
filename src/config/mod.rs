//! Identity and configuration.
//!
//! A `Config` names the system (the exchange), the application (the shared
//! RPC queue), and the instance (the private reply queue), and carries broker
//! credentials, timeouts, and prefetch limits. It is frozen when a
//! [`Synapse`](crate::Synapse) is built.
//!
//! ```
//! use std::time::Duration;
//! use synapse_rust::Config;
//!
//! let config = Config::new("shop", "orders")
//!     .with_rpc_timeout(Duration::from_secs(5))
//!     .with_event_process_num(50);
//! assert!(config.validate().is_ok());
//! ```

mod env;

use std::time::Duration;

use crate::broker::Credentials;
use crate::error::SynapseError;
use crate::id::{random_id, ID_LEN};
use crate::message::EventAddressing;

pub const DEFAULT_PROCESS_NUM: u16 = 20;
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Config {
    /// System name; also the exchange name.
    pub sys_name: String,
    /// Application name; instances of one app share its RPC queue.
    pub app_name: String,
    /// Instance id. Generated when empty.
    pub app_id: String,
    /// Log every message in and out.
    pub debug: bool,
    pub credentials: Credentials,
    /// Prefetch limit for the event consumer.
    pub event_process_num: u16,
    /// Prefetch limit for the RPC-service consumer.
    pub rpc_process_num: u16,
    pub rpc_timeout: Duration,
    /// Wait between losing the connection and rebuilding the stack.
    pub reconnect_delay: Duration,
    pub disable_event_client: bool,
    pub disable_rpc_client: bool,
    pub event_addressing: EventAddressing,
    pub exchange_auto_delete: bool,
    /// Applies to the event and RPC-service queues. Reply queues are always
    /// auto-delete.
    pub queue_auto_delete: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sys_name: String::new(),
            app_name: String::new(),
            app_id: String::new(),
            debug: false,
            credentials: Credentials::default(),
            event_process_num: DEFAULT_PROCESS_NUM,
            rpc_process_num: DEFAULT_PROCESS_NUM,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            disable_event_client: false,
            disable_rpc_client: false,
            event_addressing: EventAddressing::default(),
            exchange_auto_delete: false,
            queue_auto_delete: false,
        }
    }
}

impl Config {
    pub fn new(sys_name: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            sys_name: sys_name.into(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Build a config from `SYNAPSE_*` environment variables.
    pub fn from_env() -> Result<Self, SynapseError> {
        env::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_event_process_num(mut self, num: u16) -> Self {
        self.event_process_num = num;
        self
    }

    pub fn with_rpc_process_num(mut self, num: u16) -> Self {
        self.rpc_process_num = num;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_event_client_disabled(mut self, disabled: bool) -> Self {
        self.disable_event_client = disabled;
        self
    }

    pub fn with_rpc_client_disabled(mut self, disabled: bool) -> Self {
        self.disable_rpc_client = disabled;
        self
    }

    pub fn with_event_addressing(mut self, addressing: EventAddressing) -> Self {
        self.event_addressing = addressing;
        self
    }

    pub fn with_exchange_auto_delete(mut self, auto_delete: bool) -> Self {
        self.exchange_auto_delete = auto_delete;
        self
    }

    pub fn with_queue_auto_delete(mut self, auto_delete: bool) -> Self {
        self.queue_auto_delete = auto_delete;
        self
    }

    /// Fill in the instance id if none was given.
    pub fn with_generated_app_id(mut self) -> Self {
        if self.app_id.is_empty() {
            self.app_id = random_id(ID_LEN);
        }
        self
    }

    /// Check the identity fields that cannot be defaulted.
    pub fn validate(&self) -> Result<(), SynapseError> {
        if self.sys_name.trim().is_empty() {
            return Err(SynapseError::Config("sys_name must be set".into()));
        }
        if self.app_name.trim().is_empty() {
            return Err(SynapseError::Config("app_name must be set".into()));
        }
        for (field, value) in [("sys_name", &self.sys_name), ("app_name", &self.app_name)] {
            if value.contains(['.', '*', '#']) {
                return Err(SynapseError::Config(format!(
                    "{} must not contain '.', '*' or '#': {:?}",
                    field, value
                )));
            }
        }
        Ok(())
    }
}
