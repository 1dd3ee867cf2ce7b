//! Handler registration and the serve loop.
//!
//! `Synapse` holds the configuration, the event and RPC handler tables, and a
//! broker. `serve` runs generations until shutdown: each generation is one
//! broker connection with its topology, sessions, and consumer tasks. When a
//! connection is lost the whole generation is torn down and, after the
//! reconnect delay, a new one is built from scratch.
//!
//! ## Example
//!
//! ```ignore
//! use synapse_rust::{Config, InMemoryBroker, Synapse, rpc::reply};
//!
//! let synapse = Synapse::new(Config::new("shop", "orders"), InMemoryBroker::new())
//!     .event("web.login", |ctx| async move {
//!         println!("{:?}", ctx.params());
//!         true
//!     })
//!     .rpc("ping", |_ctx| async move { reply(200, "pong") });
//!
//! let client = synapse.client();
//! let handle = synapse.spawn();
//! client.wait_ready().await?;
//! let result = client.send_rpc("orders", "ping", serde_json::json!({})).await;
//! handle.stop().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{Broker, Connection, Session};
use crate::client::Client;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::context::Context;
use crate::error::SynapseError;
use crate::event::server::EventServer;
use crate::event::EventHandler;
use crate::message::Params;
use crate::registry::Registry;
use crate::rpc::client::drain_replies;
use crate::rpc::server::RpcServer;
use crate::rpc::{CorrelationTable, RpcHandler};
use crate::topology::{Role, Topology};

pub struct Synapse {
    config: Arc<Config>,
    events: Registry<EventHandler>,
    rpcs: Registry<RpcHandler>,
    connection: ConnectionManager,
    client: Client,
    shutdown: CancellationToken,
}

impl Synapse {
    /// Create a synapse. An instance id is generated if the config has none.
    pub fn new(config: Config, broker: impl Broker) -> Self {
        let config = Arc::new(config.with_generated_app_id());
        let connection = ConnectionManager::new(
            Arc::new(broker),
            config.credentials.clone(),
            config.reconnect_delay,
        );
        let client = Client::new(config.clone(), connection.subscribe());
        Self {
            config,
            events: Registry::new(),
            rpcs: Registry::new(),
            connection,
            client,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an event handler. `"*"` catches every event without its own
    /// handler.
    ///
    /// Uses builder pattern; returns `self` for chaining.
    pub fn event<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.events.insert(name, handler);
        self
    }

    /// Register an RPC action handler. `"*"` catches every action without its
    /// own handler.
    pub fn rpc<F, Fut>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Params> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.rpcs.insert(action, handler);
        self
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.events.names()
    }

    pub fn actions(&self) -> Vec<&str> {
        self.rpcs.names()
    }

    /// Run on a background task.
    pub fn spawn(self) -> ServeHandle {
        let token = self.shutdown.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(self.serve());
        ServeHandle {
            token,
            client,
            handle: Some(handle),
        }
    }

    /// Connect, declare, consume, and keep doing so across connection loss.
    ///
    /// Returns `Ok(())` after shutdown. Fails only on invalid configuration
    /// or when the very first topology declaration is refused.
    pub async fn serve(self) -> Result<(), SynapseError> {
        self.config.validate()?;

        let Synapse {
            config,
            events,
            rpcs,
            connection,
            client,
            shutdown,
        } = self;

        log_startup(&config, &events, &rpcs);
        let topology = Topology::plan(&config, &events.names(), !rpcs.is_empty());
        let events = Arc::new(events);
        let rpcs = Arc::new(rpcs);
        let mut established = false;

        loop {
            let dialed = tokio::select! {
                _ = shutdown.cancelled() => break,
                dialed = connection.dial() => dialed,
            };
            let conn = match dialed {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "connect failed");
                    if connection.backoff(&shutdown).await {
                        continue;
                    }
                    break;
                }
            };

            let started = Generation::start(
                conn,
                &config,
                &topology,
                &events,
                &rpcs,
                client.correlation(),
            )
            .await;
            let mut generation = match started {
                Ok(generation) => generation,
                Err(e @ SynapseError::Topology(_)) if !established => {
                    error!(error = %e, "initial topology declaration failed");
                    connection.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "generation start failed");
                    if connection.backoff(&shutdown).await {
                        continue;
                    }
                    break;
                }
            };

            established = true;
            client.install(generation.publisher.clone());
            connection.set_state(ConnectionState::Ready);
            info!(
                sys = %config.sys_name,
                app = %config.app_name,
                app_id = %config.app_id,
                "synapse ready"
            );

            let closed = generation.conn.closed();
            let stop = tokio::select! {
                reason = closed => {
                    warn!(reason = %reason, "broker connection closed");
                    false
                }
                role = generation.lost_consumer() => {
                    warn!(?role, "consumer stopped; restarting connection");
                    false
                }
                _ = shutdown.cancelled() => true,
            };

            client.clear();
            if stop {
                connection.set_state(ConnectionState::Closing);
                generation.teardown().await;
                break;
            }
            generation.teardown().await;
            if !connection.backoff(&shutdown).await {
                break;
            }
        }

        connection.set_state(ConnectionState::Closing);
        info!(app = %config.app_name, app_id = %config.app_id, "synapse stopped");
        Ok(())
    }
}

fn log_startup(config: &Config, events: &Registry<EventHandler>, rpcs: &Registry<RpcHandler>) {
    info!(
        sys = %config.sys_name,
        app = %config.app_name,
        app_id = %config.app_id,
        broker = %config.credentials.redacted_url(),
        "synapse starting"
    );
    if events.is_empty() {
        warn!("event server disabled: no event handlers registered");
    } else {
        info!(events = ?events.names(), "event server enabled");
    }
    if rpcs.is_empty() {
        warn!("rpc server disabled: no rpc handlers registered");
    } else {
        info!(actions = ?rpcs.names(), "rpc server enabled");
    }
    if config.disable_event_client {
        warn!("event client disabled");
    }
    if config.disable_rpc_client {
        warn!("rpc client disabled");
    }
}

/// One connection lifetime: its sessions and consumer tasks.
struct Generation {
    conn: Box<dyn Connection>,
    publisher: Arc<dyn Session>,
    sessions: Vec<Arc<dyn Session>>,
    tasks: JoinSet<Role>,
}

impl Generation {
    async fn start(
        conn: Box<dyn Connection>,
        config: &Arc<Config>,
        topology: &Topology,
        events: &Arc<Registry<EventHandler>>,
        rpcs: &Arc<Registry<RpcHandler>>,
        pending: CorrelationTable,
    ) -> Result<Self, SynapseError> {
        let publisher = match conn.open_session().await {
            Ok(session) => session,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e.into());
            }
        };
        let mut generation = Self {
            conn,
            publisher,
            sessions: Vec::new(),
            tasks: JoinSet::new(),
        };
        match generation
            .consume(config, topology, events, rpcs, pending)
            .await
        {
            Ok(()) => Ok(generation),
            Err(e) => {
                generation.teardown().await;
                Err(e)
            }
        }
    }

    async fn consume(
        &mut self,
        config: &Arc<Config>,
        topology: &Topology,
        events: &Arc<Registry<EventHandler>>,
        rpcs: &Arc<Registry<RpcHandler>>,
        pending: CorrelationTable,
    ) -> Result<(), SynapseError> {
        topology
            .declare(self.publisher.as_ref())
            .await
            .map_err(SynapseError::Topology)?;

        for plan in &topology.queues {
            let session = self.conn.open_session().await?;
            if plan.prefetch > 0 {
                session.set_prefetch(plan.prefetch).await?;
            }
            let stream = session.consume(&plan.name, &plan.consume).await?;
            self.sessions.push(session);
            info!(queue = %plan.name, consumer = %plan.consume.consumer_tag, "consuming");

            match plan.role {
                Role::Event => {
                    let server = EventServer::new(events.clone(), config.debug);
                    self.tasks.spawn(async move {
                        server.run(stream).await;
                        Role::Event
                    });
                }
                Role::RpcServer => {
                    let server = RpcServer::new(config.clone(), rpcs.clone(), self.publisher.clone());
                    self.tasks.spawn(async move {
                        server.run(stream).await;
                        Role::RpcServer
                    });
                }
                Role::RpcReply => {
                    let table = pending.clone();
                    let debug = config.debug;
                    self.tasks.spawn(async move {
                        drain_replies(stream, table, debug).await;
                        Role::RpcReply
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves when a consumer task ends on its own. Never resolves if there
    /// are none.
    async fn lost_consumer(&mut self) -> Option<Role> {
        if self.tasks.is_empty() {
            std::future::pending::<()>().await;
        }
        self.tasks.join_next().await.and_then(Result::ok)
    }

    async fn teardown(mut self) {
        self.tasks.shutdown().await;
        for session in &self.sessions {
            let _ = session.close().await;
        }
        let _ = self.publisher.close().await;
        let _ = self.conn.close().await;
    }
}

/// Requests shutdown of a running [`Synapse::serve`].
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a synapse running on a background task. Drop or call `stop()`
/// to shut down.
pub struct ServeHandle {
    token: CancellationToken,
    client: Client,
    handle: Option<JoinHandle<Result<(), SynapseError>>>,
}

impl ServeHandle {
    /// Stop serving and wait for teardown to finish.
    pub async fn stop(mut self) -> Result<(), SynapseError> {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| SynapseError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Wait for serving to end without requesting it.
    pub async fn join(mut self) -> Result<(), SynapseError> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| SynapseError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
