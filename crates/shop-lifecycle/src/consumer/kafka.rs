//! Kafka-backed [`MessageSource`].
//!
//! Auto-commit is disabled; offsets are committed asynchronously once a
//! delivery is settled as a success. A failed delivery leaves its offset
//! uncommitted, so it is redelivered after a rebalance or restart unless a
//! later offset on the same partition was committed first.

use super::{ConsumeOutcome, Delivery, MessageSource, Subscription};
use crate::ConsumerError;
use bytes::Bytes;
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    consumer::{CommitMode, Consumer, StreamConsumer},
};

/// Consumes one topic from a Kafka cluster.
pub struct KafkaSource {
    brokers: String,
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    /// `brokers` is a comma separated `host:port` list.
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            consumer: None,
        }
    }

    fn consumer(&self) -> Result<&StreamConsumer, ConsumerError> {
        self.consumer.as_ref().ok_or_else(|| ConsumerError::Source {
            reason: "kafka consumer is not subscribed".to_string(),
        })
    }
}

#[tonic::async_trait]
impl MessageSource for KafkaSource {
    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), ConsumerError> {
        let refuse = |reason: String| ConsumerError::Subscribe {
            topic: subscription.topic.clone(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &subscription.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| refuse(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[subscription.topic.as_str()])
            .map_err(|e| refuse(e.to_string()))?;

        tracing::debug!(
            brokers = %self.brokers,
            topic = %subscription.topic,
            "Kafka consumer created"
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        let message = self
            .consumer()?
            .recv()
            .await
            .map_err(|e| ConsumerError::Source {
                reason: e.to_string(),
            })?;

        Ok(Some(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
        }))
    }

    async fn settle(
        &mut self,
        delivery: &Delivery,
        outcome: ConsumeOutcome,
    ) -> Result<(), ConsumerError> {
        if outcome == ConsumeOutcome::Failure {
            return Ok(());
        }

        let source_err = |e: rdkafka::error::KafkaError| ConsumerError::Source {
            reason: e.to_string(),
        };
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(source_err)?;
        self.consumer()?
            .commit(&offsets, CommitMode::Async)
            .map_err(source_err)
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
        }
        Ok(())
    }
}
