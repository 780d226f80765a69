//! services/api/src/metrics.rs
//!
//! Prometheus collectors for the job worker.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use lazy_static::lazy_static;
use mindhit_core::jobs::{
    TYPE_MINDMAP_GENERATE, TYPE_SESSION_CLEANUP, TYPE_SESSION_PROCESS, TYPE_URL_TAG_EXTRACTION,
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref JOB_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("worker_job_duration_seconds", "Time spent running one job attempt")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["job_type"]
    )
    .expect("job duration histogram definition is valid");
    static ref JOBS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("worker_jobs_processed_total", "Job attempts by outcome"),
        &["job_type", "status"]
    )
    .expect("jobs processed counter definition is valid");
}

/// Outcome label for `worker_jobs_processed_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Retry,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Retry => "retry",
            JobStatus::Dead => "dead",
        }
    }
}

/// Registers the collectors. Safe to call more than once.
pub fn init_metrics() {
    REGISTRY.register(Box::new(JOB_DURATION.clone())).ok();
    REGISTRY.register(Box::new(JOBS_PROCESSED.clone())).ok();
}

/// The `job_type` label for a bus type tag. Unregistered tags pass through as-is.
pub fn job_label(type_tag: &str) -> &str {
    match type_tag {
        TYPE_URL_TAG_EXTRACTION => "tag_extraction",
        TYPE_MINDMAP_GENERATE => "mindmap_generate",
        TYPE_SESSION_PROCESS => "session_process",
        TYPE_SESSION_CLEANUP => "session_cleanup",
        other => other,
    }
}

pub fn observe_job(type_tag: &str, status: JobStatus, seconds: f64) {
    let job_type = job_label(type_tag);
    JOB_DURATION.with_label_values(&[job_type]).observe(seconds);
    JOBS_PROCESSED
        .with_label_values(&[job_type, status.as_str()])
        .inc();
}

pub fn jobs_processed(type_tag: &str, status: JobStatus) -> u64 {
    JOBS_PROCESSED
        .with_label_values(&[job_label(type_tag), status.as_str()])
        .get()
}

/// `GET /metrics` in the Prometheus text format.
pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_per_job_type() {
        init_metrics();
        let before = jobs_processed("metrics_test", JobStatus::Retry);
        observe_job("metrics_test", JobStatus::Retry, 0.2);
        observe_job("metrics_test", JobStatus::Retry, 0.3);
        assert_eq!(jobs_processed("metrics_test", JobStatus::Retry), before + 2);
        assert_eq!(jobs_processed("metrics_test", JobStatus::Dead), 0);
    }

    #[test]
    fn bus_tags_are_exported_under_short_names() {
        assert_eq!(job_label(TYPE_URL_TAG_EXTRACTION), "tag_extraction");
        assert_eq!(job_label(TYPE_MINDMAP_GENERATE), "mindmap_generate");
        assert_eq!(job_label("mystery:job"), "mystery:job");

        init_metrics();
        observe_job(TYPE_URL_TAG_EXTRACTION, JobStatus::Success, 0.1);
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains(r#"job_type="tag_extraction""#));
        assert!(!text.contains(r#"job_type="url:tag_extraction""#));
    }
}
