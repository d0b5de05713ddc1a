//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mirror_requests_total` (counter): requests handled, by module
//! - `decouple_dropped_total` (counter): requests shed by a full decouple buffer
//! - `http_response_total` (counter): mirrored responses, by module and status code
//! - `http_response_time_seconds` (histogram): mirrored request latency
//! - `http_delivery_errors_total` (counter): mirrored requests that got no response
//! - `file_written_bytes_total` (counter): bytes appended by file sinks
//! - `split_by_pipelines` (gauge): live sub-pipelines of a split-by module
//! - `worker_pool_workers` (gauge): live workers of a network sink
//!
//! # Design Decisions
//! - The `metrics` facade keeps call sites free of exporter details; the
//!   Prometheus recorder is installed once by the binary
//! - Histogram buckets are tuned for mirrored web traffic (1ms to 30s)

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Install the Prometheus recorder and return the handle used to render it.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_response_time_seconds".to_string()),
            RESPONSE_TIME_BUCKETS,
        )?
        .install_recorder()
}

pub fn record_request(module: &str) {
    counter!("mirror_requests_total", "module" => module.to_string()).increment(1);
}

pub fn record_decouple_drop(module: &str) {
    counter!("decouple_dropped_total", "module" => module.to_string()).increment(1);
}

pub fn record_response(module: &str, status: u16, elapsed: Duration) {
    counter!(
        "http_response_total",
        "module" => module.to_string(),
        "status_code" => status.to_string()
    )
    .increment(1);
    histogram!("http_response_time_seconds", "module" => module.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_delivery_error(module: &str) {
    counter!("http_delivery_errors_total", "module" => module.to_string()).increment(1);
}

pub fn record_file_bytes(module: &str, bytes: usize) {
    counter!("file_written_bytes_total", "module" => module.to_string()).increment(bytes as u64);
}

pub fn set_split_pipelines(module: &str, count: usize) {
    gauge!("split_by_pipelines", "module" => module.to_string()).set(count as f64);
}

pub fn set_pool_workers(module: &str, count: usize) {
    gauge!("worker_pool_workers", "module" => module.to_string()).set(count as f64);
}
