
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();
static SESSIONS_EVICTED: OnceLock<IntCounter> = OnceLock::new();
static TOOL_CALLS: OnceLock<IntCounter> = OnceLock::new();
static CREDENTIAL_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let registered = (|| -> prometheus::Result<()> {
        let req_counter = IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )?;
        let active_sessions = IntGauge::new("active_sessions", "Live conversational sessions")?;
        let sessions_evicted = IntCounter::new(
            "sessions_evicted_total",
            "Sessions removed after the idle window elapsed",
        )?;
        let tool_calls = IntCounter::new("tool_calls_total", "Note searches requested by the model")?;
        let credential_failures = IntCounterVec::new(
            prometheus::opts!("credential_failures_total", "Rejected provider credentials"),
            &["side"],
        )?;

        REGISTRY.register(Box::new(req_counter.clone())).ok();
        REGISTRY.register(Box::new(active_sessions.clone())).ok();
        REGISTRY.register(Box::new(sessions_evicted.clone())).ok();
        REGISTRY.register(Box::new(tool_calls.clone())).ok();
        REGISTRY.register(Box::new(credential_failures.clone())).ok();

        let _ = REQ_COUNTER.set(req_counter);
        let _ = ACTIVE_SESSIONS.set(active_sessions);
        let _ = SESSIONS_EVICTED.set(sessions_evicted);
        let _ = TOOL_CALLS.set(tool_calls);
        let _ = CREDENTIAL_FAILURES.set(credential_failures);
        Ok(())
    })();

    if let Err(e) = registered {
        error!("Failed to initialize metrics: {}", e);
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.inc();
    }
}

pub fn dec_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.dec();
    }
}

pub fn inc_evicted(count: usize) {
    if let Some(counter) = SESSIONS_EVICTED.get() {
        counter.inc_by(count as u64);
    }
}

pub fn inc_tool_calls() {
    if let Some(counter) = TOOL_CALLS.get() {
        counter.inc();
    }
}

pub fn inc_credential_failure(side: &str) {
    if let Some(counter) = CREDENTIAL_FAILURES.get() {
        counter.with_label_values(&[side]).inc();
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
