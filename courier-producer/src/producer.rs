use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use courier_common::codec;
use courier_common::envelope::Envelope;
use courier_common::sink::{Ack, MessageSink, PublishError};

/// Publishes validated envelopes to the primary topic.
///
/// Two responsibilities beyond the raw sink: a content-completeness pre-filter
/// that keeps clearly-unusable messages off the topic entirely, and a bounded
/// transport retry for broker hiccups. This retry is the producer's own and is
/// separate from the consumer-side retry machinery; once it is exhausted the
/// error goes back to the caller, who must not assume delivery.
pub struct Producer {
    sink: Arc<dyn MessageSink>,
    max_publish_attempts: u32,
    publish_retry_interval: Duration,
}

impl Producer {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        max_publish_attempts: u32,
        publish_retry_interval: Duration,
    ) -> Self {
        Self {
            sink,
            max_publish_attempts: max_publish_attempts.max(1),
            publish_retry_interval,
        }
    }

    /// Publish an envelope, keyed so that same-key envelopes preserve their
    /// order on the broker. Returns `Ok(None)` when the envelope was dropped
    /// by the pre-filter.
    pub async fn publish(&self, envelope: Envelope) -> Result<Option<Ack>, PublishError> {
        if envelope.payload.recipient.trim().is_empty() {
            warn!(
                id = %envelope.id,
                "dropping envelope with no recipient before publish"
            );
            metrics::counter!("courier_publish_dropped_total").increment(1);
            return Ok(None);
        }

        let payload =
            codec::encode(&envelope).map_err(|error| PublishError::Sink(error.to_string()))?;

        let mut attempt = 1;
        loop {
            match self.sink.send(&envelope.key, &payload).await {
                Ok(ack) => {
                    metrics::counter!("courier_published_total").increment(1);
                    return Ok(Some(ack));
                }
                Err(publish_error) if attempt < self.max_publish_attempts => {
                    warn!(
                        id = %envelope.id,
                        attempt,
                        "publish attempt failed, retrying: {}",
                        publish_error
                    );
                    metrics::counter!("courier_publish_retries_total").increment(1);
                    tokio::time::sleep(self.publish_retry_interval).await;
                    attempt += 1;
                }
                Err(publish_error) => {
                    error!(
                        id = %envelope.id,
                        attempts = attempt,
                        "exhausted publish attempts: {}",
                        publish_error
                    );
                    metrics::counter!("courier_publish_failed_total").increment(1);
                    return Err(publish_error);
                }
            }
        }
    }
}
