//! Listener for orders whose stock must be returned.
//!
//! The order service publishes an order on the reback topic when it times
//! out or is cancelled. The recorded sell detail, not the message body, says
//! what goes back into stock, and a redelivered message is acknowledged
//! without touching stock again.

use super::store::{InventoryStore, RebackOutcome};
use serde::Deserialize;
use shop_lifecycle::{
    BackgroundConsumer, ConsumerError, Delivery, HandlerError, MessageHandler, MessageSource,
};
use std::sync::Arc;

/// Name of the background consumer, used in logs.
pub const CONSUMER_NAME: &str = "inventory-reback";

/// Body published on the reback topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRebackMessage {
    #[serde(alias = "OrderSn")]
    pub order_sn: String,
    #[serde(default, alias = "Status")]
    pub status: Option<i32>,
    #[serde(default, alias = "Detail")]
    pub detail: Vec<GoodsDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodsDetail {
    #[serde(alias = "GoodsId")]
    pub goods_id: i32,
    #[serde(alias = "Num")]
    pub num: i32,
}

impl OrderRebackMessage {
    /// Decodes and validates a message payload.
    pub fn decode(payload: &[u8]) -> Result<Self, HandlerError> {
        let message: Self = serde_json::from_slice(payload)?;
        if message.order_sn.trim().is_empty() {
            return Err(HandlerError::Malformed {
                reason: "empty orderSn".to_string(),
            });
        }
        Ok(message)
    }
}

/// Restores stock for every reback message.
#[derive(Debug, Clone)]
pub struct RebackHandler {
    store: Arc<InventoryStore>,
}

impl RebackHandler {
    pub fn new(store: Arc<InventoryStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl MessageHandler for RebackHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let message = OrderRebackMessage::decode(&delivery.payload)?;
        let outcome = self.store.reback(&message.order_sn);
        metrics::counter!("inventory_reback_total", "outcome" => outcome.as_str()).increment(1);

        match outcome {
            RebackOutcome::Restored => tracing::info!(
                order_sn = %message.order_sn,
                status = ?message.status,
                "Stock returned"
            ),
            RebackOutcome::AlreadyReturned => tracing::debug!(
                order_sn = %message.order_sn,
                "Stock already returned, acknowledging redelivery"
            ),
            RebackOutcome::Unknown => tracing::warn!(
                order_sn = %message.order_sn,
                lines = message.detail.len(),
                "No stock deduction recorded for order, nothing to return"
            ),
        }
        Ok(())
    }
}

/// Builds the reback consumer over `source` and subscribes it to `topic`.
///
/// # Errors
///
/// Returns [`ConsumerError::Subscribe`] if the source refuses the
/// subscription.
pub async fn subscribe<S: MessageSource>(
    source: S,
    topic: impl Into<String>,
    consumer_group: impl Into<String>,
    store: Arc<InventoryStore>,
) -> Result<BackgroundConsumer<S>, ConsumerError> {
    let mut consumer = BackgroundConsumer::new(CONSUMER_NAME, consumer_group, source);
    consumer.subscribe(topic, RebackHandler::new(store)).await?;
    Ok(consumer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use core::time::Duration;
    use shop_lifecycle::consumer::memory::channel;
    use shop_lifecycle::{BackgroundService, ConsumeOutcome};

    fn delivery(payload: &str) -> Delivery {
        Delivery {
            topic: "order_reback".to_string(),
            partition: 0,
            offset: 0,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    fn sold_store() -> Arc<InventoryStore> {
        let store = Arc::new(InventoryStore::default());
        store.set(421, 10).unwrap();
        store.sell("SN-1", &[(421, 6)]).unwrap();
        store
    }

    #[test]
    fn decodes_camel_and_pascal_case() {
        let message = OrderRebackMessage::decode(
            br#"{"orderSn":"SN-1","status":3,"detail":[{"goodsId":421,"num":6}]}"#,
        )
        .unwrap();
        assert_eq!(message.order_sn, "SN-1");
        assert_eq!(message.status, Some(3));
        assert_eq!(message.detail[0].goods_id, 421);

        let message = OrderRebackMessage::decode(br#"{"OrderSn":"SN-2"}"#).unwrap();
        assert_eq!(message.order_sn, "SN-2");
        assert!(message.detail.is_empty());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"status":1}"#,
            br#"{"orderSn":" "}"#,
            br#"{"orderSn":"SN-1","status":"TRADE_CLOSED"}"#,
        ];
        for payload in payloads {
            let err = OrderRebackMessage::decode(payload).unwrap_err();
            assert!(matches!(err, HandlerError::Malformed { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn redelivery_restores_stock_once() {
        let store = sold_store();
        let handler = RebackHandler::new(Arc::clone(&store));
        let message = delivery(r#"{"orderSn":"SN-1"}"#);

        handler.handle(&message).await.unwrap();
        handler.handle(&message).await.unwrap();
        assert_eq!(store.stock(421).unwrap(), 10);

        // Unknown orders are acknowledged too.
        handler
            .handle(&delivery(r#"{"orderSn":"SN-404"}"#))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consumer_keeps_going_after_a_malformed_message() {
        let store = sold_store();
        let (publisher, source) = channel(8);
        let log = source.settle_log();
        let mut consumer = subscribe(source, "order_reback", "shop-inventory", Arc::clone(&store))
            .await
            .unwrap();
        consumer.start().await.unwrap();

        publisher.publish("order_reback", "{oops").await.unwrap();
        publisher
            .publish("order_reback", r#"{"orderSn":"SN-1"}"#)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while log.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        consumer.shutdown().await.unwrap();

        assert_eq!(
            log.entries(),
            vec![(0, ConsumeOutcome::Failure), (1, ConsumeOutcome::Success)]
        );
        assert_eq!(store.stock(421).unwrap(), 10);
    }
}
