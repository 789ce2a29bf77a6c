use std::sync::Arc;

use tracing::{error, info};

use courier_common::dead_letter::DeadLetterRecord;
use courier_common::sink::{Ack, MessageSink, PublishError};

/// Publishes terminal messages to the dead-letter topic.
///
/// The dead-letter topic has a single partition and the sink behind this
/// router is pinned to it: volume is expected to be low, and operators
/// inspecting the topic care about total order, not throughput. The topic's
/// retention must exceed the primary topic's to leave time for manual
/// remediation; that is topology configuration, not enforced here.
pub struct DeadLetterRouter {
    sink: Arc<dyn MessageSink>,
    topic: String,
}

impl DeadLetterRouter {
    pub fn new(sink: Arc<dyn MessageSink>, topic: &str) -> Self {
        Self {
            sink,
            topic: topic.to_owned(),
        }
    }

    /// Publish a dead-letter record. Losing one of these is a correctness
    /// bug, so a publish failure is logged and returned to the caller rather
    /// than swallowed.
    pub async fn route(&self, record: DeadLetterRecord) -> Result<Ack, PublishError> {
        let payload =
            serde_json::to_vec(&record).map_err(|error| PublishError::Sink(error.to_string()))?;
        let key = record.id.to_string();

        match self.sink.send(&key, &payload).await {
            Ok(ack) => {
                info!(
                    id = %record.id,
                    topic = %self.topic,
                    reason = %record.failure_reason,
                    final_attempt_count = record.final_attempt_count,
                    "message dead-lettered"
                );
                metrics::counter!("courier_dead_letter_records_total").increment(1);
                Ok(ack)
            }
            Err(publish_error) => {
                error!(
                    id = %record.id,
                    topic = %self.topic,
                    "failed to publish dead-letter record: {}",
                    publish_error
                );
                metrics::counter!("courier_dead_letter_publish_failures_total").increment(1);
                Err(publish_error)
            }
        }
    }
}
