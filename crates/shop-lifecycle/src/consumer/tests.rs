use super::memory::{ChannelPublisher, ChannelSource, channel};
use super::*;
use parking_lot::Mutex;
use tokio::sync::Notify;

const TOPIC: &str = "order_reback";

/// Records payloads; payloads starting with `bad` fail.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

#[tonic::async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let text = String::from_utf8_lossy(&delivery.payload).into_owned();
        self.seen.lock().push(text.clone());
        if text.starts_with("bad") {
            return Err(HandlerError::Malformed { reason: text });
        }
        Ok(())
    }
}

/// Blocks inside `handle` until released.
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    finished: Arc<Mutex<bool>>,
}

#[tonic::async_trait]
impl MessageHandler for Gate {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        *self.finished.lock() = true;
        Ok(())
    }
}

/// Refuses every subscription.
struct Refusing;

#[tonic::async_trait]
impl MessageSource for Refusing {
    async fn subscribe(&mut self, _subscription: &Subscription) -> Result<(), ConsumerError> {
        Err(ConsumerError::Source {
            reason: "broker unavailable".to_string(),
        })
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        Ok(None)
    }

    async fn settle(
        &mut self,
        _delivery: &Delivery,
        _outcome: ConsumeOutcome,
    ) -> Result<(), ConsumerError> {
        Ok(())
    }
}

fn consumer() -> (ChannelPublisher, BackgroundConsumer<ChannelSource>, memory::SettleLog) {
    let (publisher, source) = channel(16);
    let log = source.settle_log();
    (publisher, BackgroundConsumer::new("reback", "inventory", source), log)
}

async fn wait_for_settled(log: &memory::SettleLog, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn handler_failure_does_not_stop_the_subscription() {
    let (publisher, mut consumer, log) = consumer();
    let recorder = Recorder::default();
    consumer.subscribe(TOPIC, recorder.clone()).await.unwrap();
    consumer.start().await.unwrap();
    assert!(consumer.is_running());

    publisher.publish(TOPIC, "first").await.unwrap();
    publisher.publish(TOPIC, "bad payload").await.unwrap();
    publisher.publish(TOPIC, "third").await.unwrap();
    wait_for_settled(&log, 3).await;

    assert_eq!(
        log.entries(),
        vec![
            (0, ConsumeOutcome::Success),
            (1, ConsumeOutcome::Failure),
            (2, ConsumeOutcome::Success),
        ]
    );
    assert_eq!(*recorder.seen.lock(), ["first", "bad payload", "third"]);

    consumer.shutdown().await.unwrap();
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn other_topics_are_not_delivered() {
    let (publisher, mut consumer, log) = consumer();
    let recorder = Recorder::default();
    consumer.subscribe(TOPIC, recorder.clone()).await.unwrap();
    consumer.start().await.unwrap();

    publisher.publish("order_timeout", "ignored").await.unwrap();
    publisher.publish(TOPIC, "kept").await.unwrap();
    wait_for_settled(&log, 1).await;

    assert_eq!(*recorder.seen.lock(), ["kept"]);
    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_the_in_flight_handler() {
    let (publisher, mut consumer, log) = consumer();
    let gate = Gate {
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
        finished: Arc::new(Mutex::new(false)),
    };
    let entered = Arc::clone(&gate.entered);
    let release = Arc::clone(&gate.release);
    let finished = Arc::clone(&gate.finished);

    consumer.subscribe(TOPIC, gate).await.unwrap();
    consumer.start().await.unwrap();
    publisher.publish(TOPIC, "slow").await.unwrap();
    entered.notified().await;

    let mut stopping = tokio::spawn(async move {
        consumer.shutdown().await.unwrap();
        consumer
    });
    let early = tokio::time::timeout(Duration::from_millis(100), &mut stopping).await;
    assert!(early.is_err(), "shutdown returned while the handler was running");

    release.notify_one();
    let consumer = stopping.await.unwrap();
    assert!(*finished.lock());
    assert_eq!(log.entries(), vec![(0, ConsumeOutcome::Success)]);
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn start_requires_a_subscription() {
    let (_publisher, mut consumer, _log) = consumer();
    let err = consumer.start().await.unwrap_err();
    assert!(matches!(err, ConsumerError::Start { .. }));
}

#[tokio::test]
async fn second_start_is_refused() {
    let (_publisher, mut consumer, _log) = consumer();
    consumer.subscribe(TOPIC, Recorder::default()).await.unwrap();
    consumer.start().await.unwrap();

    let err = consumer.start().await.unwrap_err();
    assert!(matches!(err, ConsumerError::Start { .. }));
    assert!(consumer.is_running());

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn refused_subscription_names_the_topic() {
    let mut consumer = BackgroundConsumer::new("reback", "inventory", Refusing);
    let err = consumer
        .subscribe(TOPIC, Recorder::default())
        .await
        .unwrap_err();

    match err {
        ConsumerError::Subscribe { topic, reason } => {
            assert_eq!(topic, TOPIC);
            assert!(reason.contains("broker unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_is_idempotent_and_works_before_start() {
    let (_publisher, mut consumer, _log) = consumer();
    consumer.shutdown().await.unwrap();
    consumer.shutdown().await.unwrap();
}
