//! Prometheus metrics for the mix service.
//!
//! Everything lives in one registry exposed at `/metrics`. Path labels are
//! collapsed per route family so job ids and filenames never become labels.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    core::Collector, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

const PREFIX: &str = "mixmatch";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Requests served, by route family and status"),
        &["method", "route", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "Time to produce a response, uploads included"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["method", "route"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Uploads and jobs
    pub static ref UPLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploads_total"), "Mix requests by outcome"),
        &["outcome"]
    ).expect("Failed to create uploads_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs that reached a terminal state"),
        &["status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOBS_RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_jobs_running"),
        "Number of jobs currently being processed"
    ).expect("Failed to create jobs_running metric");

    pub static ref JOB_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Time from claim to terminal state"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0])
    ).expect("Failed to create job_duration_seconds metric");
}

fn collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_RUNNING.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ]
}

/// Register every metric. Safe to call more than once.
pub fn init_metrics() {
    for collector in collectors() {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::debug!("Metric not registered: {}", e);
        }
    }
    tracing::info!("Metrics registered");
}

/// Collapse per-resource paths so labels stay bounded
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/mix" => "/mix",
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/" => "/",
        p if p.starts_with("/status/") => "/status",
        p if p.starts_with("/download/") => "/download",
        p if p.starts_with("/files/") => "/files",
        p if p.starts_with("/admin/") => "/admin",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let route = categorize_endpoint(path);
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, route, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of a `POST /mix`
pub fn record_upload(outcome: &str) {
    UPLOADS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn job_started() {
    JOBS_RUNNING.inc();
}

pub fn job_finished(status: &str, duration: Duration) {
    JOBS_RUNNING.dec();
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
    JOB_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
