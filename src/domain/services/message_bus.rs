use async_trait::async_trait;

use crate::domain::error::BrokerError;

/// One message handed over by the broker. It stays owned by the broker
/// until it is acknowledged or rejected.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn payload(&self) -> &[u8];

    fn correlation_id(&self) -> Option<&str>;

    /// Whether the broker delivered this message before.
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), BrokerError>;

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
}

/// Sends messages to a fixed destination (exchange + routing key).
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}
