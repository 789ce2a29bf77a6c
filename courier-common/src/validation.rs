use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::envelope::Envelope;

/// Recipient addresses only need to look like addresses; deliverability is the
/// sender's problem.
static RECIPIENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("recipient pattern is valid"));

/// Highest priority a payload may carry.
pub const MAX_PRIORITY: u8 = 9;

/// A message that failed structural validation. Carries the list of offending
/// fields for operators reading logs or the dead-letter topic.
///
/// Malformed input will not become well-formed by retrying, so validation
/// failures are terminal for the message that carried them.
#[derive(Error, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub fields: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid fields: {}", self.fields.join(", "))
    }
}

/// Check an envelope against structural rules before any side effect runs.
/// Side-effect free.
pub fn validate(envelope: &Envelope) -> Result<(), ValidationError> {
    let payload = &envelope.payload;
    let mut fields = Vec::new();

    if payload.recipient.trim().is_empty() || !RECIPIENT_PATTERN.is_match(&payload.recipient) {
        fields.push("recipient".to_owned());
    }
    if payload.subject.trim().is_empty() {
        fields.push("subject".to_owned());
    }
    if payload.body.trim().is_empty() {
        fields.push("body".to_owned());
    }
    if payload.priority > MAX_PRIORITY {
        fields.push("priority".to_owned());
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { fields })
    }
}
