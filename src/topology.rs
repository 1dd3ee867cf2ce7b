//! Exchange, queues, and bindings for one application instance.
//!
//! `Topology::plan` turns configuration and registered handler names into
//! declarations; `declare` replays them on a session. Planning needs no
//! broker, so the layout can be inspected and tested on its own.
//!
//! Roles are enabled by what the instance does:
//!
//! - event queue: at least one event handler is registered
//! - RPC-service queue: at least one RPC handler is registered
//! - RPC-reply queue: the RPC client is not disabled

use tracing::debug;

use crate::broker::{BrokerError, ConsumeOptions, ExchangeOptions, QueueOptions, Session};
use crate::config::Config;
use crate::message::{
    client_key, event_binding, event_queue, reply_queue, server_key, server_queue,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Event,
    RpcServer,
    RpcReply,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuePlan {
    pub role: Role,
    pub name: String,
    pub options: QueueOptions,
    /// Routing keys bound to `name` on the exchange. No duplicates.
    pub bindings: Vec<String>,
    pub consume: ConsumeOptions,
    /// Prefetch for the consuming session (0 = unlimited).
    pub prefetch: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub exchange_options: ExchangeOptions,
    pub queues: Vec<QueuePlan>,
}

impl Topology {
    pub fn plan(config: &Config, event_names: &[&str], has_rpc_handlers: bool) -> Self {
        let sys = config.sys_name.as_str();
        let app = config.app_name.as_str();
        let app_id = config.app_id.as_str();
        let mut queues = Vec::new();

        if !event_names.is_empty() {
            let mut bindings: Vec<String> = Vec::with_capacity(event_names.len());
            for name in event_names {
                let key = event_binding(name);
                if !bindings.contains(&key) {
                    bindings.push(key);
                }
            }
            queues.push(QueuePlan {
                role: Role::Event,
                name: event_queue(sys, app),
                options: QueueOptions::durable().with_auto_delete(config.queue_auto_delete),
                bindings,
                consume: ConsumeOptions::new(format!("{}.{}.event.{}", sys, app, app_id)),
                prefetch: config.event_process_num,
            });
        }

        if has_rpc_handlers {
            queues.push(QueuePlan {
                role: Role::RpcServer,
                name: server_queue(sys, app),
                options: QueueOptions::durable().with_auto_delete(config.queue_auto_delete),
                bindings: vec![server_key(app)],
                consume: ConsumeOptions::new(format!("{}.{}.server.{}", sys, app, app_id)),
                prefetch: config.rpc_process_num,
            });
        }

        if !config.disable_rpc_client {
            queues.push(QueuePlan {
                role: Role::RpcReply,
                name: reply_queue(sys, app, app_id),
                options: QueueOptions::durable().with_auto_delete(true),
                bindings: vec![client_key(app, app_id)],
                consume: ConsumeOptions::new(client_key(app, app_id))
                    .auto_ack()
                    .exclusive(),
                prefetch: 0,
            });
        }

        Self {
            exchange: sys.to_string(),
            exchange_options: ExchangeOptions::topic()
                .with_auto_delete(config.exchange_auto_delete),
            queues,
        }
    }

    pub fn queue(&self, role: Role) -> Option<&QueuePlan> {
        self.queues.iter().find(|q| q.role == role)
    }

    /// Declare the exchange, then each queue followed by its bindings.
    pub async fn declare(&self, session: &dyn Session) -> Result<(), BrokerError> {
        session
            .declare_exchange(&self.exchange, &self.exchange_options)
            .await?;
        for queue in &self.queues {
            session.declare_queue(&queue.name, &queue.options).await?;
            for key in &queue.bindings {
                session.bind_queue(&queue.name, &self.exchange, key).await?;
                debug!(queue = %queue.name, routing_key = %key, "bound");
            }
        }
        Ok(())
    }
}
