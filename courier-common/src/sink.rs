use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::future_producer::{FutureProducer, FutureRecord};
use rdkafka::producer::Producer;
use rdkafka::util::Timeout;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Broker acknowledgment for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// Enumeration of errors for publishing through a `MessageSink`.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to create kafka producer: {0}")]
    ProducerCreation(KafkaError),
    #[error("broker rejected message: {0}")]
    Kafka(#[from] KafkaError),
    #[error("publish failed: {0}")]
    Sink(String),
}

/// A destination for wire payloads. Same-key payloads land on the same
/// partition, so per-key publish order is preserved across the broker.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, key: &str, payload: &[u8]) -> Result<Ack, PublishError>;
}

struct SinkContext;

impl rdkafka::ClientContext for SinkContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        metrics::gauge!("courier_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        metrics::gauge!("courier_kafka_callback_queue_depth").set(stats.replyq as f64);
    }
}

/// A `MessageSink` publishing to a single Kafka topic.
pub struct KafkaSink {
    producer: FutureProducer<SinkContext>,
    topic: String,
    /// A fixed destination partition. `None` routes by key. The dead-letter
    /// topic has a single partition so operators get a total order.
    partition: Option<i32>,
    ack_timeout: Duration,
}

impl KafkaSink {
    pub fn new(topic: &str, brokers: &str, tls: bool) -> Result<KafkaSink, PublishError> {
        Self::build(topic, brokers, tls, None)
    }

    /// A sink pinned to one partition of `topic`, ignoring message keys.
    pub fn pinned(
        topic: &str,
        brokers: &str,
        tls: bool,
        partition: i32,
    ) -> Result<KafkaSink, PublishError> {
        Self::build(topic, brokers, tls, Some(partition))
    }

    fn build(
        topic: &str,
        brokers: &str,
        tls: bool,
        partition: Option<i32>,
    ) -> Result<KafkaSink, PublishError> {
        info!("connecting to Kafka brokers at {}...", brokers);
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("statistics.interval.ms", "10000");

        if tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let producer: FutureProducer<SinkContext> = config
            .create_with_context(SinkContext)
            .map_err(PublishError::ProducerCreation)?;

        // Ping the cluster to make sure we can reach brokers before accepting work.
        producer
            .client()
            .fetch_metadata(Some(topic), Timeout::After(Duration::new(10, 0)))
            .map_err(PublishError::ProducerCreation)?;
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: topic.to_owned(),
            partition,
            ack_timeout: Duration::from_secs(10),
        })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, key: &str, payload: &[u8]) -> Result<Ack, PublishError> {
        let mut record = FutureRecord::to(self.topic.as_str()).key(key).payload(payload);
        if let Some(partition) = self.partition {
            record = record.partition(partition);
        }

        // Await the broker acknowledgment; an enqueued-but-unacked message is
        // not a publish.
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.ack_timeout))
            .await
            .map_err(|(error, _)| PublishError::Kafka(error))?;

        Ok(Ack { partition, offset })
    }
}

/// A published key/payload pair captured by a `MemorySink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

/// An in-process `MessageSink` for tests and local runs: publishes land in a
/// vector, acked with monotonically increasing offsets on partition 0.
#[derive(Default)]
pub struct MemorySink {
    sent: Mutex<Vec<SentMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in publish order.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Drain and return everything published so far.
    pub async fn take(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, key: &str, payload: &[u8]) -> Result<Ack, PublishError> {
        let mut sent = self.sent.lock().await;
        sent.push(SentMessage {
            key: key.to_owned(),
            payload: payload.to_vec(),
        });

        Ok(Ack {
            partition: 0,
            offset: (sent.len() - 1) as i64,
        })
    }
}
