//! In-process message source backed by a tokio channel.
//!
//! Useful for local runs and tests: a [`ChannelPublisher`] plays the broker,
//! and every settled outcome is recorded in a shared [`SettleLog`].

use super::{ConsumeOutcome, Delivery, MessageSource, Subscription};
use crate::ConsumerError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcomes settled by a [`ChannelSource`], in settle order.
#[derive(Debug, Clone, Default)]
pub struct SettleLog(Arc<Mutex<Vec<(i64, ConsumeOutcome)>>>);

impl SettleLog {
    pub fn entries(&self) -> Vec<(i64, ConsumeOutcome)> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Sending half: publishes payloads to a topic.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<(String, Bytes)>,
}

impl ChannelPublisher {
    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has been dropped.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConsumerError> {
        self.tx
            .send((topic.into(), payload.into()))
            .await
            .map_err(|_| ConsumerError::Source {
                reason: "channel source dropped".to_string(),
            })
    }
}

/// Receiving half: a [`MessageSource`] delivering messages of the subscribed
/// topic. Messages for other topics are dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<(String, Bytes)>,
    topic: Option<String>,
    next_offset: i64,
    settled: SettleLog,
}

impl ChannelSource {
    pub fn settle_log(&self) -> SettleLog {
        self.settled.clone()
    }
}

/// Creates a connected publisher/source pair with room for `capacity`
/// in-flight messages.
pub fn channel(capacity: usize) -> (ChannelPublisher, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ChannelPublisher { tx },
        ChannelSource {
            rx,
            topic: None,
            next_offset: 0,
            settled: SettleLog::default(),
        },
    )
}

#[tonic::async_trait]
impl MessageSource for ChannelSource {
    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), ConsumerError> {
        self.topic = Some(subscription.topic.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        let Some(topic) = self.topic.clone() else {
            return Err(ConsumerError::Source {
                reason: "recv before subscribe".to_string(),
            });
        };

        // `mpsc::Receiver::recv` is cancel safe, and nothing else is awaited.
        while let Some((message_topic, payload)) = self.rx.recv().await {
            if message_topic != topic {
                continue;
            }
            let offset = self.next_offset;
            self.next_offset += 1;
            return Ok(Some(Delivery {
                topic: message_topic,
                partition: 0,
                offset,
                payload,
            }));
        }
        Ok(None)
    }

    async fn settle(
        &mut self,
        delivery: &Delivery,
        outcome: ConsumeOutcome,
    ) -> Result<(), ConsumerError> {
        self.settled.0.lock().push((delivery.offset, outcome));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        self.rx.close();
        Ok(())
    }
}
