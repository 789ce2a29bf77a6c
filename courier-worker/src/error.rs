use rdkafka::error::KafkaError;
use thiserror::Error;

use courier_common::outcome::PersistError;
use courier_common::sink::PublishError;

/// Enumeration of errors related to consuming and coordinating deliveries.
/// These are infrastructure failures: the message's own validation and send
/// failures are handled inside the coordinator and never surface here.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to publish a dead-letter record: {0}")]
    DeadLetterPublish(PublishError),
    #[error("failed to persist a processing outcome")]
    Persist(#[from] PersistError),
    #[error("an error occurred consuming from kafka")]
    Kafka(#[from] KafkaError),
}
