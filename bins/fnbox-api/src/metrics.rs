// Prometheus metrics for the gateway

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use fnbox_common::types::ExecutionStatus;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Duration;

lazy_static! {
    static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fnbox_executions_total",
        "Executions by outcome",
        &["status"]
    )
    .expect("fnbox_executions_total registers once");
    static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "fnbox_execution_duration_seconds",
        "Wall time of an execution including packaging and cleanup",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("fnbox_execution_duration_seconds registers once");
    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fnbox_http_requests_total",
        "HTTP requests by matched route and status",
        &["route", "status"]
    )
    .expect("fnbox_http_requests_total registers once");
}

pub fn record_execution(language: &str, status: ExecutionStatus, elapsed: Duration) {
    EXECUTIONS_TOTAL.with_label_values(&[status.as_str()]).inc();
    EXECUTION_DURATION
        .with_label_values(&[language])
        .observe(elapsed.as_secs_f64());
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Route-layer middleware counting requests per matched route
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&route, response.status().as_str()])
        .inc();
    response
}
