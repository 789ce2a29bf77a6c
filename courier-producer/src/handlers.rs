use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing, Json, Router};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use courier_common::envelope::{Envelope, NotificationPayload};

use crate::producer::Producer;

const MAX_BODY_SIZE: usize = 1_000_000;

#[derive(Serialize, Deserialize)]
pub struct DeliverResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The body of a request made to publish a notification.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct DeliverRequestBody {
    recipient: String,
    subject: String,
    body: String,
    #[serde(default)]
    priority: u8,
    /// Partitioning key; defaults to the recipient so notifications to the
    /// same address keep their order.
    key: Option<String>,
}

pub fn app(producer: Arc<Producer>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/deliver", routing::post(deliver).with_state(producer))
}

pub async fn index() -> &'static str {
    "courier producer"
}

pub async fn deliver(
    State(producer): State<Arc<Producer>>,
    Json(request): Json<DeliverRequestBody>,
) -> Result<Json<DeliverResponse>, (StatusCode, Json<DeliverResponse>)> {
    debug!("received delivery request: {:?}", request);

    if request.body.len() > MAX_BODY_SIZE {
        return Err(bad_request("body too large"));
    }
    if request.recipient.trim().is_empty() {
        return Err(bad_request("missing recipient"));
    }

    let key = request.key.clone().unwrap_or_else(|| request.recipient.clone());
    let envelope = Envelope::new(
        &key,
        NotificationPayload {
            recipient: request.recipient,
            subject: request.subject,
            body: request.body,
            priority: request.priority,
        },
    );
    let id = envelope.id;

    let start_time = Instant::now();

    match producer.publish(envelope).await {
        Ok(Some(_ack)) => {
            metrics::histogram!("courier_publish_duration_seconds")
                .record(start_time.elapsed().as_secs_f64());
            Ok(Json(DeliverResponse {
                id: Some(id),
                error: None,
            }))
        }
        Ok(None) => Err(bad_request("missing recipient")),
        Err(publish_error) => {
            error!("failed to publish notification: {}", publish_error);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeliverResponse {
                    id: None,
                    error: Some(publish_error.to_string()),
                }),
            ))
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<DeliverResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(DeliverResponse {
            id: None,
            error: Some(message.to_owned()),
        }),
    )
}
