//! Accept notification requests over HTTP and publish them to the primary topic.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;

use courier_common::metrics::setup_metrics_routes;
use courier_common::sink::KafkaSink;

use config::Config;
use producer::Producer;

mod config;
mod handlers;
mod producer;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let sink = KafkaSink::new(
        &config.kafka.kafka_topic,
        &config.kafka.kafka_hosts,
        config.kafka.kafka_tls,
    )
    .expect("failed to create kafka sink");

    let producer = Arc::new(Producer::new(
        Arc::new(sink),
        config.max_publish_attempts,
        config.publish_retry_interval.0,
    ));

    let app = handlers::app(producer);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start courier-producer http server, {}", e),
    }
}
