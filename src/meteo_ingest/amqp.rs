// meteo_ingest - Publish Open-Meteo weather observations to RabbitMQ
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::config::BrokerConfig;
use crate::publisher::{Broker, BrokerSession, PublishError};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::protocol::AMQPErrorKind;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::fmt;

/// AMQP 0-9-1 delivery mode for messages that are written to disk by the broker.
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ broker reached over AMQP using the default virtual host.
pub struct AmqpBroker {
    uri: String,
    display: String,
}

impl AmqpBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        let user = utf8_percent_encode(config.user(), NON_ALPHANUMERIC);
        let password = utf8_percent_encode(config.password(), NON_ALPHANUMERIC);

        AmqpBroker {
            uri: format!(
                "amqp://{}:{}@{}:{}/%2f",
                user,
                password,
                config.host(),
                config.port()
            ),
            display: format!("amqp://{}@{}:{}/%2f", user, config.host(), config.port()),
        }
    }

    /// Connection URI with the password left out, safe for logging.
    pub fn address(&self) -> &str {
        &self.display
    }
}

impl fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpBroker").field("address", &self.display).finish()
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, PublishError> {
        tracing::debug!(message = "connecting to broker", address = %self.display);
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::Connection(Box::new(e)))?;

        let channel = match open_confirm_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close) = connection.close(REPLY_SUCCESS, "OK").await {
                    tracing::debug!(message = "unable to close broker connection", error = %close);
                }
                return Err(classify(e));
            }
        };

        Ok(Box::new(AmqpSession { connection, channel }))
    }
}

async fn open_confirm_channel(connection: &Connection) -> Result<Channel, lapin::Error> {
    let channel = connection.create_channel().await?;
    channel.confirm_select(ConfirmSelectOptions::default()).await?;
    Ok(channel)
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_durable_queue(&mut self, queue: &str) -> Result<(), PublishError> {
        let opts = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(queue, opts, FieldTable::default())
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn publish_persistent(&mut self, queue: &str, body: &[u8], content_type: &str) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type(content_type.into());

        // Default exchange, routed directly to the queue of the same name.
        let confirmation = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await
            .map_err(classify)?
            .await
            .map_err(classify)?;

        if confirmation.is_nack() {
            return Err(PublishError::Channel(
                format!("broker rejected message for queue {}", queue).into(),
            ));
        }

        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), PublishError> {
        let channel = self.channel.close(REPLY_SUCCESS, "OK").await;
        let connection = self.connection.close(REPLY_SUCCESS, "OK").await;
        channel.and(connection).map_err(classify)
    }
}

/// Sort lapin errors into retryable loss of the connection and everything else.
///
/// I/O errors, a connection that is no longer open, and hard protocol errors (which the
/// broker answers by closing the whole connection, e.g. `CONNECTION_FORCED` on restart)
/// are `Connection`. Soft protocol errors and channel-level failures are `Channel`.
fn classify(e: lapin::Error) -> PublishError {
    let lost = match &e {
        lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => true,
        lapin::Error::ProtocolError(amqp) => matches!(amqp.kind(), AMQPErrorKind::Hard(_)),
        _ => false,
    };

    if lost {
        PublishError::Connection(Box::new(e))
    } else {
        PublishError::Channel(Box::new(e))
    }
}
