//! Consume the primary topic and drive each message to a delivery outcome.
use std::sync::Arc;

use axum::{routing, Router};
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};

use courier_common::metrics::setup_metrics_routes;
use courier_common::outcome::{MemoryOutcomeStore, OutcomeStore};
use courier_common::pg_store::PgOutcomeStore;
use courier_common::retry::RetryPolicy;
use courier_common::sender::{HttpSender, Retryability};
use courier_common::sink::KafkaSink;

use config::Config;
use consumer::DeliveryConsumer;
use coordinator::Coordinator;
use dead_letter::DeadLetterRouter;

mod config;
mod consumer;
mod coordinator;
mod dead_letter;
mod error;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

pub async fn index() -> &'static str {
    "courier worker"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let retry_policy = RetryPolicy::build(
        config.retry_policy.multiplier,
        config.retry_policy.initial_interval.0,
    )
    .maximum_interval(config.retry_policy.maximum_interval.0)
    .max_retries(config.retry_policy.max_retries)
    .provide()
    .expect("invalid retry policy configuration");

    let primary = Arc::new(
        KafkaSink::new(
            &config.kafka.kafka_topic,
            &config.kafka.kafka_hosts,
            config.kafka.kafka_tls,
        )
        .expect("failed to create primary kafka sink"),
    );

    let dead_letter_topic = config.dead_letter_topic();
    let dead_letter_sink = Arc::new(
        KafkaSink::pinned(
            &dead_letter_topic,
            &config.kafka.kafka_hosts,
            config.kafka.kafka_tls,
            0,
        )
        .expect("failed to create dead-letter kafka sink"),
    );

    let sender = Arc::new(
        HttpSender::new(&config.sender_endpoint, config.request_timeout.0)
            .expect("invalid sender endpoint"),
    );

    let outcomes: Arc<dyn OutcomeStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgOutcomeStore::new(&config.outcome_table, url, config.max_pg_connections)
                .await
                .expect("failed to connect to the outcome database"),
        ),
        None => Arc::new(MemoryOutcomeStore::new()),
    };

    let coordinator = Coordinator::new(
        sender,
        primary,
        DeadLetterRouter::new(dead_letter_sink, &dead_letter_topic),
        outcomes,
        retry_policy,
        Retryability::new(config.non_retryable_statuses.0.clone()),
    );

    let consumer =
        DeliveryConsumer::new(&config.kafka, coordinator).expect("failed to create kafka consumer");

    let app = Router::new().route("/", routing::get(index));
    let app = setup_metrics_routes(app);
    let http_server = Box::pin(listen(app, config.bind()));
    let consumer_loop = Box::pin(consumer.run());

    match select(http_server, consumer_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => tracing::error!("failed to start courier-worker http server, {}", e),
        },
        Either::Right((consume_result, _)) => match consume_result {
            Ok(_) => {}
            Err(e) => tracing::error!("courier-worker consumer loop exited, {}", e),
        },
    };
}
