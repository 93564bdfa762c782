//! Background consumer of an asynchronous message channel.
//!
//! A [`BackgroundConsumer`] pairs a broker adapter ([`MessageSource`]) with a
//! [`MessageHandler`] and drives deliveries on its own tokio task, started
//! and stopped independently of the request-serving path.
//!
//! ## Lifecycle
//!
//! 1. [`BackgroundConsumer::subscribe`] joins the topic. A failure here is
//!    fatal for the owning process.
//! 2. [`BackgroundService::start`] spawns the delivery loop. The orchestrator
//!    calls it only after registration succeeded.
//! 3. [`BackgroundService::shutdown`] cancels the loop, waits for the
//!    in-flight handler to finish and closes the source. The orchestrator
//!    awaits it before stopping the servers and deregistering.
//!
//! Handler failures are settled per message and never stop the loop; retry
//! and dead-lettering are the broker's business.
//!
//! ## Structure
//!
//! - [`memory`] - in-process channel source.
//! - `kafka` - Kafka source (`kafka` feature).

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use crate::{ConsumerError, HandlerError};
use bytes::Bytes;
use core::time::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause after a failed receive before polling the source again.
const RECV_BACKOFF: Duration = Duration::from_millis(500);

/// Topic subscription. Every message on the topic is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub consumer_group: String,
}

/// One message handed to a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

impl Delivery {
    /// Human readable position, for logs.
    pub fn position(&self) -> String {
        format!("{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Result of handling one delivery, reported back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Success,
    Failure,
}

impl ConsumeOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Broker adapter.
#[tonic::async_trait]
pub trait MessageSource: Send + 'static {
    /// Joins `subscription.topic` as part of `subscription.consumer_group`.
    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), ConsumerError>;

    /// Waits for the next delivery. `Ok(None)` means the source is closed.
    ///
    /// Must be cancel safe: the delivery loop races it against shutdown.
    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError>;

    /// Reports the handler's outcome for `delivery`.
    async fn settle(
        &mut self,
        delivery: &Delivery,
        outcome: ConsumeOutcome,
    ) -> Result<(), ConsumerError>;

    /// Releases broker resources. Called once after the loop stopped.
    async fn close(&mut self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

/// Per-message business logic.
#[tonic::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// A background task with an explicit start/stop lifecycle, driven by the
/// orchestrator.
#[tonic::async_trait]
pub trait BackgroundService: Send {
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<(), ConsumerError>;

    /// Stops the service and returns once it has fully stopped.
    async fn shutdown(&mut self) -> Result<(), ConsumerError>;
}

enum ConsumerState<S> {
    Idle(S),
    Running {
        token: CancellationToken,
        task: JoinHandle<S>,
    },
    Stopped,
}

/// Drives one subscription of a [`MessageSource`]; see the
/// [module documentation](self).
pub struct BackgroundConsumer<S> {
    name: String,
    consumer_group: String,
    subscription: Option<(Subscription, Arc<dyn MessageHandler>)>,
    state: ConsumerState<S>,
}

impl<S: MessageSource> BackgroundConsumer<S> {
    pub fn new(name: impl Into<String>, consumer_group: impl Into<String>, source: S) -> Self {
        Self {
            name: name.into(),
            consumer_group: consumer_group.into(),
            subscription: None,
            state: ConsumerState::Idle(source),
        }
    }

    /// Subscribes `handler` to every message on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the source refuses the
    /// subscription, the consumer already has one, or it is no longer idle.
    pub async fn subscribe(
        &mut self,
        topic: impl Into<String>,
        handler: impl MessageHandler,
    ) -> Result<(), ConsumerError> {
        let subscription = Subscription {
            topic: topic.into(),
            consumer_group: self.consumer_group.clone(),
        };

        let refuse = |reason: &str| ConsumerError::Subscribe {
            topic: subscription.topic.clone(),
            reason: reason.to_string(),
        };
        if self.subscription.is_some() {
            return Err(refuse("consumer already has a subscription"));
        }
        let ConsumerState::Idle(source) = &mut self.state else {
            return Err(refuse("consumer is not idle"));
        };

        source
            .subscribe(&subscription)
            .await
            .map_err(|e| match e {
                e @ ConsumerError::Subscribe { .. } => e,
                other => refuse(&other.to_string()),
            })?;

        tracing::info!(
            consumer = %self.name,
            topic = %subscription.topic,
            group = %subscription.consumer_group,
            "Subscribed"
        );
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        self.subscription = Some((subscription, handler));
        Ok(())
    }

    pub const fn is_running(&self) -> bool {
        matches!(self.state, ConsumerState::Running { .. })
    }
}

#[tonic::async_trait]
impl<S: MessageSource> BackgroundService for BackgroundConsumer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<(), ConsumerError> {
        let Some((subscription, handler)) = &self.subscription else {
            return Err(ConsumerError::Start {
                reason: "no subscription".to_string(),
            });
        };

        match core::mem::replace(&mut self.state, ConsumerState::Stopped) {
            ConsumerState::Idle(source) => {
                let token = CancellationToken::new();
                let task = tokio::spawn(delivery_loop(
                    self.name.clone(),
                    source,
                    Arc::clone(handler),
                    token.clone(),
                ));
                tracing::info!(
                    consumer = %self.name,
                    topic = %subscription.topic,
                    "Consumer started"
                );
                self.state = ConsumerState::Running { token, task };
                Ok(())
            }
            other => {
                self.state = other;
                Err(ConsumerError::Start {
                    reason: "consumer already started".to_string(),
                })
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), ConsumerError> {
        let mut source = match core::mem::replace(&mut self.state, ConsumerState::Stopped) {
            ConsumerState::Running { token, task } => {
                token.cancel();
                task.await.map_err(|e| ConsumerError::Shutdown {
                    reason: format!("delivery loop failed: {e}"),
                })?
            }
            ConsumerState::Idle(source) => source,
            ConsumerState::Stopped => return Ok(()),
        };

        source.close().await?;
        tracing::info!(consumer = %self.name, "Consumer stopped");
        Ok(())
    }
}

/// Receives, handles and settles deliveries until `token` is cancelled or
/// the source closes. Returns the source so it can be closed.
///
/// Cancellation is only observed between deliveries, so a handler that has
/// started always runs to completion and is settled.
async fn delivery_loop<S: MessageSource>(
    name: String,
    mut source: S,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
) -> S {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = source.recv() => next,
        };

        let delivery = match next {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                tracing::info!(consumer = %name, "Message source closed");
                break;
            }
            Err(e) => {
                tracing::error!(consumer = %name, "Failed to receive message: {e}");
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(RECV_BACKOFF) => continue,
                }
            }
        };

        let outcome = match handler.handle(&delivery).await {
            Ok(()) => ConsumeOutcome::Success,
            Err(e) => {
                tracing::warn!(
                    consumer = %name,
                    position = %delivery.position(),
                    "Message handler failed: {e}"
                );
                ConsumeOutcome::Failure
            }
        };
        metrics::counter!("consumer_messages_total", "outcome" => outcome.as_str()).increment(1);

        if let Err(e) = source.settle(&delivery, outcome).await {
            tracing::warn!(
                consumer = %name,
                position = %delivery.position(),
                "Failed to settle message: {e}"
            );
        }
    }
    source
}

#[cfg(test)]
mod tests;
