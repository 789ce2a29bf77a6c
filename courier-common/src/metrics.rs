use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram buckets sized for delivery work: sends are fast, but backoff
/// waits reach into minutes.
const BUCKET_SECONDS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0,
];

/// Install the Prometheus recorder and add `/metrics` and a liveness route to
/// the provided router.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .route("/_liveness", get(|| std::future::ready("ok")))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(BUCKET_SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap()
}
