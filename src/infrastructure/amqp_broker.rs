use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::BrokerConfig,
    domain::{
        error::BrokerError,
        services::message_bus::{InboundDelivery, OutboundChannel, OutboundMessage},
    },
    infrastructure::retry_policy::RetryPolicy,
};

const CONSUMER_TAG: &str = "user-persistence-worker";
const PERSISTENT: u8 = 2;

/// One connection and one channel to the registration exchange.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    config: BrokerConfig,
}

impl AmqpBroker {
    /// Connects, retrying transient failures, and prepares the channel.
    pub async fn connect(
        config: &BrokerConfig,
        prefetch: u16,
        retry: &RetryPolicy,
    ) -> Result<Self, BrokerError> {
        retry
            .run("broker connect", || Self::open(config, prefetch))
            .await
    }

    async fn open(config: &BrokerConfig, prefetch: u16) -> Result<Self, BrokerError> {
        let uri = AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: config.host.clone(),
                port: config.port,
            },
            vhost: config.vhost.clone(),
            ..Default::default()
        };

        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(broker_error)?;
        let channel = connection.create_channel().await.map_err(broker_error)?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(broker_error)?;

        if config.verify_topology {
            channel
                .exchange_declare(
                    &config.exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(broker_error)?;
            let queue = channel
                .queue_declare(
                    &config.queue,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(broker_error)?;
            info!(
                exchange = %config.exchange,
                queue = %config.queue,
                pending = queue.message_count(),
                "broker topology verified"
            );
        }

        info!(host = %config.host, port = config.port, vhost = %config.vhost, prefetch, "connected to broker");
        Ok(Self {
            connection,
            channel,
            config: config.clone(),
        })
    }

    /// Starts a manual-ack consumer on the persist queue.
    pub async fn consume(
        &self,
    ) -> Result<BoxStream<'static, Result<AmqpDelivery, BrokerError>>, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.config.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)?;
        info!(
            queue = %self.config.queue,
            routing_key = %self.config.persist_routing_key,
            "consuming registration requests"
        );

        Ok(consumer
            .map(|delivery| delivery.map(AmqpDelivery::new).map_err(broker_error))
            .boxed())
    }

    /// Publisher bound to the exchange and the confirmation routing key.
    pub fn outbound_channel(&self) -> AmqpOutboundChannel {
        AmqpOutboundChannel {
            channel: self.channel.clone(),
            exchange: self.config.exchange.clone(),
            routing_key: self.config.persisted_routing_key.clone(),
        }
    }

    /// Cancels the consumer, then closes the channel and the connection.
    pub async fn close(self) -> Result<(), BrokerError> {
        if let Err(err) = self
            .channel
            .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
            .await
        {
            warn!(error = %err, "failed to cancel consumer");
        }
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(broker_error)?;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(broker_error)?;
        info!("broker connection closed");
        Ok(())
    }
}

pub struct AmqpDelivery {
    delivery: Delivery,
}

impl AmqpDelivery {
    fn new(delivery: Delivery) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl InboundDelivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    fn correlation_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str())
    }

    fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(broker_error)
    }
}

#[derive(Clone)]
pub struct AmqpOutboundChannel {
    channel: Channel,
    exchange: String,
    routing_key: String,
}

#[async_trait]
impl OutboundChannel for AmqpOutboundChannel {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT)
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()));
        if let Some(correlation_id) = message.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id));
        }

        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(broker_error)?
            .await
            .map_err(broker_error)?;
        debug!(exchange = %self.exchange, routing_key = %self.routing_key, "confirmation published");
        Ok(())
    }
}

fn broker_error(err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::Connection(err.to_string())
        }
        lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed(err.to_string()),
        lapin::Error::SerialisationError(_) | lapin::Error::ParsingError(_) => {
            BrokerError::Serialization(err.to_string())
        }
        _ => BrokerError::Protocol(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use lapin::{ChannelState, ConnectionState};

    use super::*;
    use crate::domain::error::Retryable;

    #[test]
    fn test_io_error_is_retryable() {
        let err = broker_error(lapin::Error::IOError(Arc::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        ))));
        assert!(matches!(err, BrokerError::Connection(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_closed_channel_is_retryable() {
        let err = broker_error(lapin::Error::InvalidChannelState(ChannelState::Closed));
        assert!(matches!(err, BrokerError::ChannelClosed(_)));
        assert!(err.is_retryable());

        let err = broker_error(lapin::Error::InvalidConnectionState(ConnectionState::Closed));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_protocol_error_is_not_retryable() {
        let err = broker_error(lapin::Error::ChannelsLimitReached);
        assert!(matches!(err, BrokerError::Protocol(_)));
        assert!(!err.is_retryable());
    }
}
