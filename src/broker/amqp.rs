//! AMQP 0-9-1 broker over lapin. Requires the `amqp` feature.
//!
//! ```ignore
//! use synapse_rust::broker::AmqpBroker;
//! use synapse_rust::{Config, Synapse};
//!
//! let synapse = Synapse::new(Config::from_env()?, AmqpBroker::new());
//! synapse.serve().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, ConnectionProperties};
use tokio::sync::watch;
use tracing::warn;

use super::{
    Acker, Broker, BrokerError, CloseReason, Connection, ConsumeOptions, Credentials, Delivery,
    DeliveryStream, ExchangeKind, ExchangeOptions, Properties, QueueOptions, Session,
};

/// Dials a RabbitMQ-compatible broker at `Credentials::url()`.
#[derive(Clone, Debug, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>, BrokerError> {
        let conn = lapin::Connection::connect(&credentials.url(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let (tx, closed) = watch::channel(None);
        let tx = Arc::new(tx);
        let on_error = tx.clone();
        conn.on_error(move |err| {
            on_error.send_replace(Some(CloseReason::new(320, err.to_string())));
        });

        Ok(Box::new(AmqpConnection { conn, tx, closed }))
    }
}

struct AmqpConnection {
    conn: lapin::Connection,
    tx: Arc<watch::Sender<Option<CloseReason>>>,
    closed: watch::Receiver<Option<CloseReason>>,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn open_session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let channel = self.conn.create_channel().await.map_err(broker_error)?;
        Ok(Arc::new(AmqpSession { channel }))
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        let mut closed = self.closed.clone();
        Box::pin(async move {
            loop {
                if let Some(reason) = closed.borrow_and_update().clone() {
                    return reason;
                }
                if closed.changed().await.is_err() {
                    return CloseReason::new(320, "connection dropped");
                }
            }
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.tx
            .send_replace(Some(CloseReason::new(200, "closed by client")));
        if !self.conn.status().connected() {
            return Ok(());
        }
        self.conn
            .close(200, "closed by client")
            .await
            .map_err(broker_error)
    }
}

struct AmqpSession {
    channel: Channel,
}

#[async_trait]
impl Session for AmqpSession {
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), BrokerError> {
        let kind = match options.kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        };
        let declare = ExchangeDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            ..Default::default()
        };
        self.channel
            .exchange_declare(name, kind, declare, FieldTable::default())
            .await
            .map_err(broker_error)
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), BrokerError> {
        let declare = QueueDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: options.exclusive,
            ..Default::default()
        };
        self.channel
            .queue_declare(name, declare, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                to_amqp(properties),
            )
            .await
            .map_err(broker_error)?;
        confirm.await.map(|_| ()).map_err(broker_error)
    }

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError> {
        let consume = BasicConsumeOptions {
            no_ack: options.auto_ack,
            exclusive: options.exclusive,
            ..Default::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, &options.consumer_tag, consume, FieldTable::default())
            .await
            .map_err(broker_error)?;

        let auto_ack = options.auto_ack;
        let tag = options.consumer_tag.clone();
        let stream = consumer
            .scan((), move |_, item| {
                future::ready(match item {
                    Ok(delivery) => Some(delivery),
                    Err(e) => {
                        warn!(consumer = %tag, error = %e, "consumer stream failed");
                        None
                    }
                })
            })
            .map(move |delivery| from_amqp(delivery, auto_ack));
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(200, "closed by client")
            .await
            .map_err(broker_error)
    }
}

/// Settles one lapin delivery. The tag is carried by the wrapped acker.
struct DeliveryAcker(lapin::acker::Acker);

#[async_trait]
impl Acker for DeliveryAcker {
    async fn ack(&self, _delivery_tag: u64) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(broker_error)
    }
}

fn from_amqp(delivery: lapin::message::Delivery, auto_ack: bool) -> Delivery {
    let converted = Delivery::new(
        delivery.delivery_tag,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        from_amqp_properties(&delivery.properties),
        delivery.data,
    )
    .with_redelivered(delivery.redelivered);
    if auto_ack {
        converted
    } else {
        converted.with_acker(Arc::new(DeliveryAcker(delivery.acker)))
    }
}

fn to_amqp(properties: Properties) -> BasicProperties {
    let mut amqp = BasicProperties::default();
    if let Some(v) = properties.content_type {
        amqp = amqp.with_content_type(ShortString::from(v));
    }
    if let Some(v) = properties.kind {
        amqp = amqp.with_type(ShortString::from(v));
    }
    if let Some(v) = properties.app_id {
        amqp = amqp.with_app_id(ShortString::from(v));
    }
    if let Some(v) = properties.reply_to {
        amqp = amqp.with_reply_to(ShortString::from(v));
    }
    if let Some(v) = properties.message_id {
        amqp = amqp.with_message_id(ShortString::from(v));
    }
    if let Some(v) = properties.correlation_id {
        amqp = amqp.with_correlation_id(ShortString::from(v));
    }
    amqp
}

fn from_amqp_properties(amqp: &BasicProperties) -> Properties {
    let text = |v: &Option<ShortString>| v.as_ref().map(|s| s.as_str().to_string());
    Properties {
        content_type: text(amqp.content_type()),
        kind: text(amqp.kind()),
        app_id: text(amqp.app_id()),
        reply_to: text(amqp.reply_to()),
        message_id: text(amqp.message_id()),
        correlation_id: text(amqp.correlation_id()),
    }
}

fn broker_error(e: lapin::Error) -> BrokerError {
    match e {
        lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed,
        e @ (lapin::Error::InvalidConnectionState(_) | lapin::Error::IOError(_)) => {
            BrokerError::ConnectionClosed(e.to_string())
        }
        e => BrokerError::Other(Box::new(e)),
    }
}
