//! AMQP broker backends
//!
//! A [`BrokerQueue`] is a durable named queue with one consumer per message;
//! a [`BrokerFanout`] is a fan-out exchange where each endpoint owns an
//! exclusive, server-named queue bound to it. Items travel as JSON.
//!
//! `get` on either never blocks: it is a single `basic.get` poll whatever
//! [`Wait`] is passed. Use [`crate::recv_polling`] for blocking semantics.
//! Network failures are returned as [`QueueError::Broker`] without retry.

use async_trait::async_trait;
use conveyor_config::BrokerConfig;
use lapin::options::{
    BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use tracing::{debug, info};

use crate::error::QueueResult;
use crate::queue::{Wait, WorkQueue};

const PERSISTENT: u8 = 2;

/// One connection and channel to the broker
pub struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    pub async fn open(config: &BrokerConfig) -> QueueResult<Self> {
        debug!(url = %config.redacted_url(), "connecting to broker");
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok(Self { connection, channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> QueueResult<()> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn poll(&self, queue: &str) -> QueueResult<Option<Vec<u8>>> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await?;
        Ok(message.map(|m| m.delivery.data))
    }

    async fn close(&self) -> QueueResult<()> {
        if self.channel.status().connected() {
            self.channel.close(200, "OK").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(200, "OK").await?;
        }
        Ok(())
    }
}

/// Durable point-to-point queue
pub struct BrokerQueue<T> {
    name: String,
    connection: BrokerConnection,
    _item: PhantomData<fn() -> T>,
}

impl<T> BrokerQueue<T> {
    /// Connect and declare the queue (idempotent)
    pub async fn open(config: &BrokerConfig, name: impl Into<String>) -> QueueResult<Self> {
        let name = name.into();
        let connection = BrokerConnection::open(config).await?;
        connection
            .channel
            .queue_declare(
                &name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue = %name, "declared broker queue");

        Ok(Self {
            name,
            connection,
            _item: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<T> WorkQueue<T> for BrokerQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn put(&self, item: T) -> QueueResult<()> {
        let body = serde_json::to_vec(&item)?;
        self.connection.publish("", &self.name, &body).await
    }

    async fn get(&self, _wait: Wait) -> QueueResult<Option<T>> {
        match self.connection.poll(&self.name).await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    async fn size(&self) -> QueueResult<usize> {
        let queue = self
            .connection
            .channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    passive: true,
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.message_count() as usize)
    }

    async fn close(&self) -> QueueResult<()> {
        self.connection.close().await
    }

    fn honours_wait(&self) -> bool {
        false
    }
}

/// Fan-out exchange endpoint: `put` reaches every endpoint bound to the
/// exchange, `get` reads this endpoint's private copy
pub struct BrokerFanout<T> {
    exchange: String,
    queue: String,
    connection: BrokerConnection,
    _item: PhantomData<fn() -> T>,
}

impl<T> BrokerFanout<T> {
    /// Connect, declare the exchange and bind a fresh exclusive queue to it
    pub async fn open(config: &BrokerConfig, exchange: impl Into<String>) -> QueueResult<Self> {
        let exchange = exchange.into();
        let connection = BrokerConnection::open(config).await?;
        connection
            .channel
            .exchange_declare(
                &exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let declared = connection
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue = declared.name().as_str().to_string();

        connection
            .channel
            .queue_bind(
                &queue,
                &exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(exchange = %exchange, queue = %queue, "subscribed to fanout");

        Ok(Self {
            exchange,
            queue,
            connection,
            _item: PhantomData,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

#[async_trait]
impl<T> WorkQueue<T> for BrokerFanout<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn put(&self, item: T) -> QueueResult<()> {
        let body = serde_json::to_vec(&item)?;
        self.connection.publish(&self.exchange, "", &body).await
    }

    async fn get(&self, _wait: Wait) -> QueueResult<Option<T>> {
        match self.connection.poll(&self.queue).await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    async fn size(&self) -> QueueResult<usize> {
        let queue = self
            .connection
            .channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.message_count() as usize)
    }

    async fn close(&self) -> QueueResult<()> {
        self.connection.close().await
    }

    fn honours_wait(&self) -> bool {
        false
    }
}
