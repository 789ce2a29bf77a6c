use std::collections::HashSet;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::header;
use thiserror::Error;
use tracing::debug;

use crate::envelope::Envelope;

/// Enumeration of errors for a failed notification send. This is the raw
/// failure; whether it is worth retrying is decided by `Retryability`, not by
/// the error type.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("notification request failed: {0}")]
    Request(reqwest::Error),
    #[error("notification gateway answered with status {0}")]
    Status(u16),
}

/// The outbound collaborator whose failures drive the retry machinery.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), SendError>;
}

/// A `NotificationSender` that POSTs envelopes to an HTTP notification
/// gateway.
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpSender {
    pub fn new(endpoint: &str, timeout: std::time::Duration) -> Result<Self, url::ParseError> {
        let endpoint: reqwest::Url = endpoint.parse()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Courier Delivery Worker")
            .timeout(timeout)
            .build()
            .expect("failed to construct reqwest client for notification sender");

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl NotificationSender for HttpSender {
    async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        debug!("sending notification {} to gateway", envelope.id);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&envelope.payload)
            .send()
            .await
            .map_err(SendError::Request)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SendError::Status(status.as_u16()))
        }
    }
}

/// A send failure tagged with the retry decision, so retry-vs-terminal is an
/// explicit branch at the call site rather than an error-type lookup.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("notification could not be delivered but may be retried later: {0}")]
    Transient(SendError),
    #[error("notification could not be delivered and will not be retried: {0}")]
    NonRetryable(SendError),
}

/// Classifies send failures as transient or terminal.
///
/// Transport-level failures (connect errors, timeouts) are always transient.
/// Response statuses are transient when server-side or rate-limiting; that
/// baseline can be narrowed with an operator-supplied list of statuses to
/// treat as terminal, since "will never succeed on retry" is ultimately a
/// gateway-specific judgment.
#[derive(Debug, Clone, Default)]
pub struct Retryability {
    non_retryable_statuses: HashSet<u16>,
}

impl Retryability {
    pub fn new(non_retryable_statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            non_retryable_statuses: non_retryable_statuses.into_iter().collect(),
        }
    }

    pub fn classify(&self, error: SendError) -> ProcessingError {
        match &error {
            SendError::Request(_) => ProcessingError::Transient(error),
            SendError::Status(code) => {
                if self.non_retryable_statuses.contains(code) {
                    ProcessingError::NonRetryable(error)
                } else if is_retryable_status(*code) {
                    ProcessingError::Transient(error)
                } else {
                    ProcessingError::NonRetryable(error)
                }
            }
        }
    }
}

fn is_retryable_status(code: u16) -> bool {
    match StatusCode::from_u16(code) {
        Ok(status) => status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        Err(_) => false,
    }
}
