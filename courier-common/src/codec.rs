use thiserror::Error;

use crate::envelope::Envelope;

/// Enumeration of errors for decoding a wire payload into an `Envelope`.
/// A payload that fails to decode will not become well-formed on retry, so
/// these are terminal for the message that carried them.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("received empty payload")]
    EmptyPayload,
    #[error("payload is not a valid envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Enumeration of errors for serializing an `Envelope` to its wire form.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize an envelope to its JSON wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Deserialize an envelope from its JSON wire form.
pub fn decode(payload: &[u8]) -> Result<Envelope, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    Ok(serde_json::from_slice(payload)?)
}
