use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::envelope::Envelope;

/// Why a message was declared terminal and routed to the dead-letter topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Validation,
    Decode,
    ExhaustedRetries,
    /// A send failure the operator-supplied classification declared terminal.
    NonRetryable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::Validation => write!(f, "validation"),
            FailureReason::Decode => write!(f, "decode"),
            FailureReason::ExhaustedRetries => write!(f, "exhausted-retries"),
            FailureReason::NonRetryable => write!(f, "non-retryable"),
        }
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(FailureReason::Validation),
            "decode" => Ok(FailureReason::Decode),
            "exhausted-retries" => Ok(FailureReason::ExhaustedRetries),
            "non-retryable" => Ok(FailureReason::NonRetryable),
            invalid => Err(format!("{} is not a valid FailureReason", invalid)),
        }
    }
}

/// The reason strings are part of the dead-letter wire format, so serialize
/// through `Display`/`FromStr` rather than the derived variant names.
impl Serialize for FailureReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FailureReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FailureReason::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// What gets published to the dead-letter topic: the message as we last knew
/// it, plus where it came from and why it could not be processed.
///
/// Written exactly once per logical message, when that message is declared
/// terminal. Consumers of the dead-letter topic are operators; nothing in this
/// pipeline reads these records back automatically.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub failure_reason: FailureReason,
    pub final_attempt_count: u32,
    /// The decoded envelope, when the payload decoded at all.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub envelope: Option<Envelope>,
    /// The raw payload, base64-encoded, when it did not decode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw_payload: Option<String>,
}

impl DeadLetterRecord {
    pub fn for_envelope(
        envelope: Envelope,
        original_topic: &str,
        original_partition: i32,
        original_offset: i64,
        failure_reason: FailureReason,
        final_attempt_count: u32,
    ) -> Self {
        Self {
            id: envelope.id,
            original_topic: original_topic.to_owned(),
            original_partition,
            original_offset,
            failure_reason,
            final_attempt_count,
            envelope: Some(envelope),
            raw_payload: None,
        }
    }

    /// Record an undecodable payload. The original bytes carry no usable
    /// identity, so a fresh id is minted to key the outcome record.
    pub fn for_raw_payload(
        payload: &[u8],
        original_topic: &str,
        original_partition: i32,
        original_offset: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            original_topic: original_topic.to_owned(),
            original_partition,
            original_offset,
            failure_reason: FailureReason::Decode,
            final_attempt_count: 1,
            envelope: None,
            raw_payload: Some(BASE64.encode(payload)),
        }
    }
}
