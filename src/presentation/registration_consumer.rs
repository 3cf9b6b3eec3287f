//! Per-message pipeline and the worker pool that drives it.
//!
//! ```text
//! delivery ─► decode ─┬─ poison ──────────────────────────► publish FAILED ─► ack
//!                     └─ persist (with backoff) ─┬─ outcome ─► publish ───────► ack
//!                                                └─ store down
//!                                                     ├─ first delivery ──────► nack(requeue)
//!                                                     └─ redelivered ─► publish FAILED ─► ack
//! ```

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::{
    sync::{Semaphore, watch},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::WorkerConfig,
    domain::{
        error::{BrokerError, RegistrationError, Retryable},
        models::{outcome::PersistenceOutcome, registration::RegistrationRequest},
        repositories::user_repository::UserStore,
        services::{
            message_bus::{InboundDelivery, OutboundChannel},
            password_service::SecretHasher,
        },
    },
    infrastructure::retry_policy::RetryPolicy,
    presentation::{messages::RegistrationMessage, response_publisher::ResponsePublisher},
    usecase::register_user_usecase::RegisterUserUsecase,
};

/// What happened to a delivery once its worker was done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledged after the outcome was handed to the publisher.
    Acknowledged(PersistenceOutcome),
    /// Returned to the queue for one more delivery.
    Requeued,
}

pub struct RegistrationConsumer<S: UserStore, H: SecretHasher, C: OutboundChannel> {
    usecase: RegisterUserUsecase<S, H>,
    publisher: ResponsePublisher<C>,
    retry: RetryPolicy,
}

impl<S, H, C> RegistrationConsumer<S, H, C>
where
    S: UserStore,
    H: SecretHasher + 'static,
    C: OutboundChannel,
{
    pub fn new(
        usecase: RegisterUserUsecase<S, H>,
        publisher: ResponsePublisher<C>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            usecase,
            publisher,
            retry,
        }
    }

    /// Processes one delivery end to end and settles it with the broker.
    pub async fn handle<D: InboundDelivery>(&self, delivery: &D) -> Disposition {
        let message = match RegistrationMessage::decode(delivery.payload()) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, bytes = delivery.payload().len(), "discarding poison message");
                let outcome = PersistenceOutcome::failed(None, err.to_string());
                self.publisher
                    .publish(&outcome, delivery.correlation_id())
                    .await;
                acknowledge(delivery).await;
                return Disposition::Acknowledged(outcome);
            }
        };

        let request = RegistrationRequest::from(message);
        let correlation_id = delivery
            .correlation_id()
            .map(str::to_string)
            .or_else(|| request.request_id.clone());
        let dni = request.national_id.map(|d| d.value());
        debug!(?dni, redelivered = delivery.redelivered(), "registration request received");

        let persisted = self
            .retry
            .run("persist user", || self.usecase.try_persist(&request))
            .await;
        let outcome = match persisted {
            Ok(outcome) => outcome,
            Err(err) if err.is_retryable() && !delivery.redelivered() => {
                warn!(?dni, error = %err, "store unavailable, returning message to the queue");
                if let Err(nack_err) = delivery.nack(true).await {
                    error!(?dni, error = %nack_err, "failed to requeue message");
                }
                return Disposition::Requeued;
            }
            Err(err) => {
                error!(?dni, error = %err, "giving up on registration");
                PersistenceOutcome::failed(
                    request.national_id,
                    RegistrationError::from(err).to_string(),
                )
            }
        };

        self.publisher
            .publish(&outcome, correlation_id.as_deref())
            .await;
        acknowledge(delivery).await;
        Disposition::Acknowledged(outcome)
    }
}

impl<S, H, C> RegistrationConsumer<S, H, C>
where
    S: UserStore + 'static,
    H: SecretHasher + 'static,
    C: OutboundChannel + 'static,
{
    /// Pulls deliveries into at most `worker.concurrency` concurrent workers
    /// until shutdown is signalled or the stream ends, then drains.
    ///
    /// Workers still busy after `worker.shutdown_grace` are aborted; their
    /// transactions roll back and their deliveries go back to the broker.
    /// A retryable stream error stops the loop and is returned.
    pub async fn run<D, St>(
        self: Arc<Self>,
        mut deliveries: St,
        mut shutdown: watch::Receiver<bool>,
        worker: &WorkerConfig,
    ) -> Result<(), BrokerError>
    where
        D: InboundDelivery + 'static,
        St: Stream<Item = Result<D, BrokerError>> + Unpin,
    {
        let semaphore = Arc::new(Semaphore::new(worker.concurrency));
        let mut workers = JoinSet::new();
        info!(concurrency = worker.concurrency, "worker pool started");

        let result = loop {
            let permit = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let next = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
                next = deliveries.next() => next,
            };

            match next {
                None => {
                    warn!("delivery stream ended");
                    break Ok(());
                }
                Some(Err(err)) if err.is_retryable() => {
                    error!(error = %err, "delivery stream failed");
                    break Err(err);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "skipping unreadable delivery");
                }
                Some(Ok(delivery)) => {
                    let consumer = Arc::clone(&self);
                    workers.spawn(async move {
                        let _permit = permit;
                        consumer.handle(&delivery).await
                    });
                }
            }

            while let Some(joined) = workers.try_join_next() {
                log_worker_exit(joined);
            }
        };

        info!(in_flight = workers.len(), "stopped accepting deliveries, draining workers");
        let drained = tokio::time::timeout(worker.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                log_worker_exit(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                grace_ms = worker.shutdown_grace.as_millis() as u64,
                "grace period elapsed, aborting workers"
            );
            workers.shutdown().await;
        }
        info!("worker pool stopped");
        result
    }
}

async fn acknowledge<D: InboundDelivery>(delivery: &D) {
    if let Err(err) = delivery.ack().await {
        error!(error = %err, "failed to acknowledge message");
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_worker_exit(joined: Result<Disposition, tokio::task::JoinError>) {
    match joined {
        Ok(disposition) => debug!(?disposition, "worker finished"),
        Err(err) if err.is_panic() => error!(error = %err, "worker panicked"),
        Err(_) => {}
    }
}
