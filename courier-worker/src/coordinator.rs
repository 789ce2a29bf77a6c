use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use courier_common::codec;
use courier_common::dead_letter::{DeadLetterRecord, FailureReason};
use courier_common::envelope::Envelope;
use courier_common::outcome::{Outcome, OutcomeStatus, OutcomeStore};
use courier_common::retry::RetryPolicy;
use courier_common::sender::{NotificationSender, ProcessingError, Retryability};
use courier_common::sink::MessageSink;
use courier_common::validation::validate;

use crate::dead_letter::DeadLetterRouter;
use crate::error::WorkerError;

/// A raw message pulled off the primary topic, before any decoding.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// The per-message state machine: validate, invoke the sender, and decide
/// between delivered, retry-with-backoff, and dead-letter.
///
/// The coordinator exclusively owns the terminal-vs-retryable decision. Its
/// collaborators are injected at construction and are all stateless
/// publishers or stores; nothing here takes a lock across messages, so
/// independent partition workers can share one coordinator.
pub struct Coordinator {
    sender: Arc<dyn NotificationSender>,
    primary: Arc<dyn MessageSink>,
    dead_letters: DeadLetterRouter,
    outcomes: Arc<dyn OutcomeStore>,
    policy: RetryPolicy,
    retryability: Retryability,
}

impl Coordinator {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        primary: Arc<dyn MessageSink>,
        dead_letters: DeadLetterRouter,
        outcomes: Arc<dyn OutcomeStore>,
        policy: RetryPolicy,
        retryability: Retryability,
    ) -> Self {
        Self {
            sender,
            primary,
            dead_letters,
            outcomes,
            policy,
            retryability,
        }
    }

    /// Run one consumption attempt to its outcome.
    ///
    /// Every return path has either delivered the message, scheduled its
    /// redelivery, or dead-lettered it, and has recorded an outcome against
    /// its id. An `Err` means an infrastructure failure before any of that
    /// could be guaranteed; the caller must not commit the message's offset.
    pub async fn process(&self, message: ConsumedMessage) -> Result<Outcome, WorkerError> {
        let labels = [("topic", message.topic.clone())];
        metrics::counter!("courier_messages_total", &labels).increment(1);

        // Validating: corrupt payloads will not become well-formed on retry.
        let mut envelope = match codec::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(decode_error) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "failed to decode payload: {}",
                    decode_error
                );
                let record = DeadLetterRecord::for_raw_payload(
                    &message.payload,
                    &message.topic,
                    message.partition,
                    message.offset,
                );
                return self
                    .dead_letter(record, FailureReason::Decode, 1, &message.topic)
                    .await;
            }
        };

        envelope.record_origin(&message.topic, message.partition, message.offset);
        let attempt = envelope.attempt();

        if let Err(validation_error) = validate(&envelope) {
            warn!(
                id = %envelope.id,
                "rejecting envelope that failed validation: {}",
                validation_error
            );
            let record = self.terminal_record(envelope, FailureReason::Validation, attempt);
            return self
                .dead_letter(record, FailureReason::Validation, attempt, &message.topic)
                .await;
        }

        // Processing: the only state that spends a retry budget.
        let now = tokio::time::Instant::now();
        let send_result = self.sender.send(&envelope).await;
        let elapsed = now.elapsed().as_secs_f64();

        match send_result {
            Ok(()) => {
                self.outcomes
                    .record(envelope.id, OutcomeStatus::Delivered, attempt, None)
                    .await?;

                metrics::counter!("courier_messages_delivered", &labels).increment(1);
                metrics::histogram!("courier_processing_duration_seconds", &labels)
                    .record(elapsed);

                Ok(Outcome::Delivered)
            }
            Err(send_error) => match self.retryability.classify(send_error) {
                ProcessingError::NonRetryable(cause) => {
                    warn!(
                        id = %envelope.id,
                        attempt,
                        "send failed terminally: {}",
                        cause
                    );
                    let record =
                        self.terminal_record(envelope, FailureReason::NonRetryable, attempt);
                    self.dead_letter(record, FailureReason::NonRetryable, attempt, &message.topic)
                        .await
                }
                ProcessingError::Transient(cause) if self.policy.is_exhausted(attempt) => {
                    warn!(
                        id = %envelope.id,
                        attempt,
                        "send failed and retries are exhausted: {}",
                        cause
                    );
                    let record =
                        self.terminal_record(envelope, FailureReason::ExhaustedRetries, attempt);
                    self.dead_letter(record, FailureReason::ExhaustedRetries, attempt, &message.topic)
                        .await
                }
                ProcessingError::Transient(cause) => {
                    let next_delay = self.policy.next_delay(attempt);
                    warn!(
                        id = %envelope.id,
                        attempt,
                        next_delay_ms = next_delay.as_millis() as u64,
                        "send failed, scheduling redelivery: {}",
                        cause
                    );

                    self.schedule_retry(envelope.for_retry(), next_delay);
                    self.outcomes
                        .record(
                            envelope.id,
                            OutcomeStatus::Retrying,
                            attempt,
                            Some(cause.to_string()),
                        )
                        .await?;

                    metrics::counter!("courier_messages_retried", &labels).increment(1);

                    Ok(Outcome::Retrying {
                        attempt,
                        next_delay,
                    })
                }
            },
        }
    }

    fn terminal_record(
        &self,
        envelope: Envelope,
        reason: FailureReason,
        final_attempt_count: u32,
    ) -> DeadLetterRecord {
        // Dead-letter records point at the first consumption of the message,
        // not at whichever redelivery happened to exhaust it.
        let (topic, partition, offset) = envelope
            .origin()
            .expect("origin is recorded before any terminal decision");
        DeadLetterRecord::for_envelope(
            envelope,
            &topic,
            partition,
            offset,
            reason,
            final_attempt_count,
        )
    }

    async fn dead_letter(
        &self,
        record: DeadLetterRecord,
        reason: FailureReason,
        final_attempt_count: u32,
        topic: &str,
    ) -> Result<Outcome, WorkerError> {
        let id = record.id;
        let labels = [("topic", topic.to_owned())];

        self.dead_letters
            .route(record)
            .await
            .map_err(WorkerError::DeadLetterPublish)?;
        self.outcomes
            .record(
                id,
                OutcomeStatus::DeadLettered,
                final_attempt_count,
                Some(reason.to_string()),
            )
            .await?;

        metrics::counter!("courier_messages_dead_lettered", &labels).increment(1);

        Ok(Outcome::DeadLettered { reason })
    }

    /// Park a redelivery: after `delay`, the envelope is appended back onto
    /// the primary topic under its original key. The message becomes visible
    /// for re-processing no earlier than `delay` after the failed attempt,
    /// with identity and attempt count preserved. The worker does not block
    /// on the wait, so other keys on the partition keep flowing.
    fn schedule_retry(&self, retry: Envelope, delay: Duration) {
        let primary = Arc::clone(&self.primary);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let payload = match codec::encode(&retry) {
                Ok(payload) => payload,
                Err(encode_error) => {
                    error!(id = %retry.id, "failed to encode redelivery: {}", encode_error);
                    return;
                }
            };

            if let Err(publish_error) = primary.send(&retry.key, &payload).await {
                error!(
                    id = %retry.id,
                    attempt = retry.attempt(),
                    "failed to re-enqueue envelope for redelivery: {}",
                    publish_error
                );
                metrics::counter!("courier_requeue_failures_total").increment(1);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use courier_common::envelope::NotificationPayload;
    use courier_common::outcome::MemoryOutcomeStore;
    use courier_common::sender::SendError;
    use courier_common::sink::MemorySink;

    /// A sender that pops scripted results; once the script runs out it
    /// succeeds. Tracks how many times it was invoked.
    struct FakeSender {
        script: Mutex<VecDeque<Result<(), SendError>>>,
        calls: Mutex<u32>,
    }

    impl FakeSender {
        fn scripted(script: Vec<Result<(), SendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn always_failing_with(status: u16, failures: u32) -> Self {
            Self::scripted(
                (0..failures)
                    .map(|_| Err(SendError::Status(status)))
                    .collect(),
            )
        }

        async fn calls(&self) -> u32 {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl NotificationSender for FakeSender {
        async fn send(&self, _envelope: &Envelope) -> Result<(), SendError> {
            *self.calls.lock().await += 1;
            self.script.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    struct Fixture {
        sender: Arc<FakeSender>,
        primary: Arc<MemorySink>,
        dead_letters: Arc<MemorySink>,
        outcomes: Arc<MemoryOutcomeStore>,
        coordinator: Coordinator,
        policy: RetryPolicy,
    }

    fn fixture_with(sender: FakeSender, max_retries: u32, retryability: Retryability) -> Fixture {
        let sender = Arc::new(sender);
        let primary = Arc::new(MemorySink::new());
        let dead_letters = Arc::new(MemorySink::new());
        let outcomes = Arc::new(MemoryOutcomeStore::new());
        let policy = RetryPolicy::build(2.0, time::Duration::from_secs(1))
            .maximum_interval(time::Duration::from_secs(30))
            .max_retries(max_retries)
            .provide()
            .unwrap();

        let coordinator = Coordinator::new(
            sender.clone(),
            primary.clone(),
            DeadLetterRouter::new(dead_letters.clone(), "notifications-dlt"),
            outcomes.clone(),
            policy,
            retryability,
        );

        Fixture {
            sender,
            primary,
            dead_letters,
            outcomes,
            coordinator,
            policy,
        }
    }

    fn fixture(sender: FakeSender, max_retries: u32) -> Fixture {
        fixture_with(sender, max_retries, Retryability::default())
    }

    fn envelope() -> Envelope {
        Envelope::new(
            "user@example.com",
            NotificationPayload {
                recipient: "user@example.com".to_owned(),
                subject: "password reset".to_owned(),
                body: "click here".to_owned(),
                priority: 2,
            },
        )
    }

    fn message_for(envelope: &Envelope, offset: i64) -> ConsumedMessage {
        ConsumedMessage {
            topic: "notifications".to_owned(),
            partition: 0,
            offset,
            payload: codec::encode(envelope).unwrap(),
        }
    }

    async fn dead_letter_record(sink: &MemorySink) -> DeadLetterRecord {
        let sent = sink.sent().await;
        assert_eq!(sent.len(), 1, "expected exactly one dead-letter record");
        serde_json::from_slice(&sent[0].payload).unwrap()
    }

    /// Feed the coordinator a message and keep replaying its scheduled
    /// redeliveries until it reaches a terminal outcome. Returns that outcome
    /// and the number of processing attempts made.
    async fn drive_to_terminal(fix: &Fixture, first: ConsumedMessage) -> (Outcome, u32) {
        let mut message = first;
        let mut attempts = 0u32;
        let mut offset = message.offset;

        loop {
            attempts += 1;
            let outcome = fix.coordinator.process(message).await.unwrap();
            match outcome {
                Outcome::Retrying { next_delay, .. } => {
                    // Not visible before the delay elapses.
                    assert!(fix.primary.sent().await.is_empty());
                    tokio::time::sleep(next_delay + time::Duration::from_millis(1)).await;
                    tokio::task::yield_now().await;

                    let mut requeued = fix.primary.take().await;
                    assert_eq!(requeued.len(), 1, "expected exactly one redelivery");
                    let requeued = requeued.pop().unwrap();

                    offset += 1;
                    message = ConsumedMessage {
                        topic: "notifications".to_owned(),
                        partition: 0,
                        offset,
                        payload: requeued.payload,
                    };
                }
                terminal => return (terminal, attempts),
            }
        }
    }

    #[tokio::test]
    async fn test_successful_send_is_delivered() {
        let fix = fixture(FakeSender::scripted(vec![Ok(())]), 3);

        let envelope = envelope();
        let outcome = fix
            .coordinator
            .process(message_for(&envelope, 0))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Delivered);
        assert_eq!(fix.sender.calls().await, 1);
        assert!(fix.primary.sent().await.is_empty());
        assert!(fix.dead_letters.sent().await.is_empty());

        let record = fix.outcomes.get(envelope.id).await.unwrap().unwrap();
        assert_eq!(record.status, OutcomeStatus::Delivered);
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_the_sender() {
        let fix = fixture(FakeSender::scripted(vec![]), 3);

        let mut invalid = envelope();
        invalid.payload.recipient = "not-an-address".to_owned();

        let outcome = fix
            .coordinator
            .process(message_for(&invalid, 5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: FailureReason::Validation
            }
        );
        assert_eq!(fix.sender.calls().await, 0);

        let record = dead_letter_record(&fix.dead_letters).await;
        assert_eq!(record.id, invalid.id);
        assert_eq!(record.failure_reason, FailureReason::Validation);
        assert_eq!(record.final_attempt_count, 1);
        assert_eq!(record.original_topic, "notifications");
        assert_eq!(record.original_offset, 5);

        let outcome_record = fix.outcomes.get(invalid.id).await.unwrap().unwrap();
        assert_eq!(outcome_record.status, OutcomeStatus::DeadLettered);
        assert_eq!(outcome_record.reason, Some("validation".to_owned()));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dead_lettered() {
        let fix = fixture(FakeSender::scripted(vec![]), 3);

        let outcome = fix
            .coordinator
            .process(ConsumedMessage {
                topic: "notifications".to_owned(),
                partition: 2,
                offset: 17,
                payload: b"not json".to_vec(),
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: FailureReason::Decode
            }
        );
        assert_eq!(fix.sender.calls().await, 0);

        let record = dead_letter_record(&fix.dead_letters).await;
        assert_eq!(record.failure_reason, FailureReason::Decode);
        assert_eq!(record.original_partition, 2);
        assert_eq!(record.original_offset, 17);
        assert!(record.envelope.is_none());
        assert!(record.raw_payload.is_some());

        // The synthesized id still gets an outcome record.
        let outcome_record = fix.outcomes.get(record.id).await.unwrap().unwrap();
        assert_eq!(outcome_record.status, OutcomeStatus::DeadLettered);
        assert_eq!(outcome_record.reason, Some("decode".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_send_exhausts_after_max_retries_plus_one_attempts() {
        let max_retries = 5;
        let fix = fixture(FakeSender::always_failing_with(503, 100), max_retries);

        let envelope = envelope();
        let (outcome, attempts) = drive_to_terminal(&fix, message_for(&envelope, 0)).await;

        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: FailureReason::ExhaustedRetries
            }
        );
        assert_eq!(attempts, max_retries + 1);
        assert_eq!(fix.sender.calls().await, max_retries + 1);

        let record = dead_letter_record(&fix.dead_letters).await;
        assert_eq!(record.id, envelope.id);
        assert_eq!(record.failure_reason, FailureReason::ExhaustedRetries);
        assert_eq!(record.final_attempt_count, max_retries + 1);
        // Origin points at the first consumption, not the final redelivery.
        assert_eq!(record.original_offset, 0);

        let outcome_record = fix.outcomes.get(envelope.id).await.unwrap().unwrap();
        assert_eq!(outcome_record.status, OutcomeStatus::DeadLettered);
        assert_eq!(outcome_record.attempt_count, max_retries + 1);
        assert_eq!(outcome_record.reason, Some("exhausted-retries".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_succeeding_on_fifth_attempt_is_delivered() {
        let fix = fixture(FakeSender::always_failing_with(500, 4), 5);

        let envelope = envelope();
        let (outcome, attempts) = drive_to_terminal(&fix, message_for(&envelope, 0)).await;

        assert_eq!(outcome, Outcome::Delivered);
        assert_eq!(attempts, 5);
        assert!(fix.dead_letters.sent().await.is_empty());

        let record = fix.outcomes.get(envelope.id).await.unwrap().unwrap();
        assert_eq!(record.status, OutcomeStatus::Delivered);
        assert_eq!(record.attempt_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_follow_the_policy() {
        let fix = fixture(FakeSender::always_failing_with(503, 3), 5);

        let envelope = envelope();
        let outcome = fix
            .coordinator
            .process(message_for(&envelope, 0))
            .await
            .unwrap();

        let Outcome::Retrying { attempt, next_delay } = outcome else {
            panic!("expected a retry outcome");
        };
        assert_eq!(attempt, 1);
        assert_eq!(next_delay, fix.policy.next_delay(1));

        // Just before the delay the redelivery is not visible yet.
        tokio::time::sleep(next_delay - time::Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert!(fix.primary.sent().await.is_empty());

        tokio::time::sleep(time::Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        let requeued = fix.primary.take().await;
        assert_eq!(requeued.len(), 1);
        let redelivery = codec::decode(&requeued[0].payload).unwrap();
        assert_eq!(redelivery.id, envelope.id);
        assert_eq!(redelivery.attempt(), 2);
        assert_eq!(requeued[0].key, envelope.key);
    }

    #[tokio::test]
    async fn test_operator_classified_terminal_status_is_dead_lettered_immediately() {
        // 503 is transient by default; the operator list declares it terminal.
        let fix = fixture_with(
            FakeSender::always_failing_with(503, 1),
            3,
            Retryability::new([503]),
        );

        let envelope = envelope();
        let outcome = fix
            .coordinator
            .process(message_for(&envelope, 0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: FailureReason::NonRetryable
            }
        );
        assert_eq!(fix.sender.calls().await, 1);
        assert!(fix.primary.sent().await.is_empty());

        let record = dead_letter_record(&fix.dead_letters).await;
        assert_eq!(record.failure_reason, FailureReason::NonRetryable);
        assert_eq!(record.final_attempt_count, 1);
    }
}
