use tracing::{error, info};

use crate::{
    domain::{
        error::BrokerError,
        models::outcome::PersistenceOutcome,
        services::message_bus::{OutboundChannel, OutboundMessage},
    },
    infrastructure::retry_policy::RetryPolicy,
    presentation::messages::ConfirmationMessage,
};

/// Sends persistence outcomes back to the bus. Best effort: a confirmation
/// that cannot be sent is logged and dropped.
pub struct ResponsePublisher<C: OutboundChannel> {
    channel: C,
    retry: RetryPolicy,
}

impl<C: OutboundChannel> ResponsePublisher<C> {
    pub fn new(channel: C, retry: RetryPolicy) -> Self {
        Self { channel, retry }
    }

    /// Returns whether the confirmation reached the broker.
    pub async fn publish(&self, outcome: &PersistenceOutcome, correlation_id: Option<&str>) -> bool {
        let dni = outcome.national_id.map(|d| d.value());
        match self.try_publish(outcome, correlation_id).await {
            Ok(()) => {
                info!(?dni, status = ?outcome.status, "confirmation sent");
                true
            }
            Err(err) => {
                error!(?dni, status = ?outcome.status, error = %err, "failed to send confirmation");
                false
            }
        }
    }

    async fn try_publish(
        &self,
        outcome: &PersistenceOutcome,
        correlation_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(&ConfirmationMessage::from(outcome))
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let message = OutboundMessage {
            payload,
            correlation_id: correlation_id.map(str::to_string),
        };

        self.retry
            .run("publish confirmation", || self.channel.send(message.clone()))
            .await
    }
}
