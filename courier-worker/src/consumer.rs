use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use tracing::{debug, error, info};

use courier_common::outcome::Outcome;

use crate::config::KafkaConfig;
use crate::coordinator::{ConsumedMessage, Coordinator};
use crate::error::WorkerError;

/// Pulls messages off the primary topic and drives each one through the
/// coordinator.
///
/// Offsets are stored manually, and only after the coordinator has reached an
/// outcome and recorded it: a crash mid-processing redelivers the message,
/// which is the at-least-once side of the bargain. Per-partition ordering and
/// at-most-one in-flight attempt per partition are the broker's guarantees.
pub struct DeliveryConsumer {
    consumer: StreamConsumer,
    topic: String,
    coordinator: Coordinator,
}

impl DeliveryConsumer {
    pub fn new(config: &KafkaConfig, coordinator: Coordinator) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &config.kafka_consumer_group)
            .set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: config.kafka_topic.to_owned(),
            coordinator,
        })
    }

    /// Run this consumer until shutdown is requested or processing hits an
    /// infrastructure failure. The in-flight message finishes processing
    /// before the loop exits; a message whose outcome was not recorded never
    /// has its offset stored.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let mut shutdown = Box::pin(tokio::signal::ctrl_c());

        info!(topic = %self.topic, "consuming primary topic");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping consumption");
                    return Ok(());
                }
                received = self.consumer.recv() => {
                    let message = received?;
                    let consumed = ConsumedMessage {
                        topic: message.topic().to_owned(),
                        partition: message.partition(),
                        offset: message.offset(),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    };

                    let outcome = process_and_store(&self.coordinator, consumed, || {
                        self.consumer.store_offset(
                            message.topic(),
                            message.partition(),
                            message.offset(),
                        )
                    })
                    .await
                    .map_err(|worker_error| {
                        error!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "failed to process message: {}",
                            worker_error
                        );
                        worker_error
                    })?;

                    debug!(
                        partition = message.partition(),
                        offset = message.offset(),
                        "processed message: {:?}",
                        outcome
                    );
                }
            }
        }
    }
}

/// Drive one message to its outcome, then mark its offset as consumed.
///
/// A coordinator error aborts before the offset is touched and must stop the
/// consumer: were the loop to carry on, a later success on the same partition
/// would store a higher offset and the commit would skip past the failed
/// message, losing it without an outcome or a dead-letter record. A failed
/// offset store on its own is survivable; the broker redelivers.
async fn process_and_store(
    coordinator: &Coordinator,
    message: ConsumedMessage,
    store_offset: impl FnOnce() -> Result<(), KafkaError>,
) -> Result<Outcome, WorkerError> {
    let outcome = coordinator.process(message).await?;

    if let Err(kafka_error) = store_offset() {
        error!("failed to store offset: {}", kafka_error);
    }

    Ok(outcome)
}
