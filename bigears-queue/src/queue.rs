//! Queue destination and its RabbitMQ implementation.
//!
//! The publisher only needs one capability from a queue: send a text body
//! with a flat set of string-typed attributes. [`AmqpQueue`] provides it over
//! a persistent lapin connection, carrying the attributes as AMQP headers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::envelope::{MessageAttributes, PAYLOAD_CONTENT_TYPE};

/// Asynchronous "send message" capability.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Send `body` with the given attributes. Resolves once the queue accepted it.
    async fn send_message(&self, body: String, attributes: MessageAttributes) -> Result<()>;
}

#[async_trait]
impl<T: Queue + ?Sized> Queue for Arc<T> {
    async fn send_message(&self, body: String, attributes: MessageAttributes) -> Result<()> {
        (**self).send_message(body, attributes).await
    }
}

/// RabbitMQ queue named after the publisher.
///
/// Keeps a persistent connection and channel, reconnecting on the next send
/// if the channel has dropped.
#[derive(Clone)]
pub struct AmqpQueue {
    inner: Arc<AmqpQueueInner>,
}

struct AmqpQueueInner {
    url: String,
    name: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpQueue {
    /// Connect to the broker at `url` and declare the durable queue `name`.
    pub async fn connect(url: String, name: String) -> Result<Self> {
        let queue = Self {
            inner: Arc::new(AmqpQueueInner {
                url,
                name,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        };
        queue.ensure_connected().await?;
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!(queue = %self.inner.name, "amqp_queue_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        ch.queue_declare(
            &self.inner.name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {}", self.inner.name))?;

        info!(queue = %self.inner.name, "amqp_queue_declared");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_connection_close_error");
            }
        }

        info!(queue = %self.inner.name, "amqp_queue_closed");
    }
}

/// Message attributes as AMQP headers, one long-string per attribute.
fn attribute_headers(attributes: &MessageAttributes) -> FieldTable {
    let mut headers = FieldTable::default();
    for (name, attribute) in attributes.iter() {
        headers.insert(
            ShortString::from(name.to_string()),
            AMQPValue::LongString(LongString::from(attribute.string_value.clone())),
        );
    }
    headers
}

#[async_trait]
impl Queue for AmqpQueue {
    async fn send_message(&self, body: String, attributes: MessageAttributes) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let mut properties = BasicProperties::default()
            .with_delivery_mode(2) // Persistent
            .with_content_type(PAYLOAD_CONTENT_TYPE.into())
            .with_headers(attribute_headers(&attributes));
        if let Some(id) = attributes.get("UUID") {
            properties = properties.with_message_id(id.into());
        }

        let confirmation = channel
            .basic_publish(
                "",
                &self.inner.name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                properties,
            )
            .await
            .context("Failed to publish message")?
            .await
            .context("Failed to confirm publish")?;
        if confirmation.is_nack() {
            anyhow::bail!("Broker rejected message for queue {}", self.inner.name);
        }

        debug!(
            queue = %self.inner.name,
            id = attributes.get("UUID").unwrap_or_default(),
            bytes = body.len(),
            "amqp_message_published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Location;

    #[test]
    fn test_attribute_headers_carry_every_attribute() {
        let attributes = MessageAttributes::new("id-1", Location::S3, "bucket", "region");
        let headers = attribute_headers(&attributes);
        let inner = headers.inner();

        assert_eq!(inner.len(), 4);
        assert_eq!(
            inner.get(&ShortString::from("Location")),
            Some(&AMQPValue::LongString(LongString::from("s3".to_string())))
        );
        assert_eq!(
            inner.get(&ShortString::from("UUID")),
            Some(&AMQPValue::LongString(LongString::from("id-1".to_string())))
        );
    }
}
