// src/metrics.rs
//! Prometheus counters for model calls, fallbacks, alerts and persistence.

use std::sync::OnceLock;
use std::time::Duration;

use axum::{routing::get, Router};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::analyze::ai_adapter::AiError;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder once per process. Later calls
    /// (tests build many routers) reuse the first handle. If another recorder
    /// is already installed, the returned handle renders an empty registry.
    pub fn init() -> Self {
        let handle = HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(error = %e, "prometheus recorder not installed; /metrics will be empty");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            })
            .clone();
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub fn record_ai_call(provider: &'static str, elapsed: Duration, error: Option<&AiError>) {
    let outcome = error.map(AiError::kind).unwrap_or("ok");
    counter!("ai_calls_total", "provider" => provider, "outcome" => outcome).increment(1);
    histogram!("ai_call_seconds", "provider" => provider).record(elapsed.as_secs_f64());
}

pub fn record_assessment(path: &'static str) {
    counter!("risk_assessments_total", "path" => path).increment(1);
}

pub fn record_assessment_fallback(reason: &'static str) {
    counter!("risk_assessment_fallbacks_total", "reason" => reason).increment(1);
}

pub fn record_sentiment_fallback(reason: &'static str) {
    counter!("sentiment_fallbacks_total", "reason" => reason).increment(1);
}

pub fn record_chat_turn(escalated: bool) {
    let escalated = if escalated { "true" } else { "false" };
    counter!("chat_turns_total", "escalated" => escalated).increment(1);
}

pub fn record_alert(alert_type: &'static str, outcome: &'static str) {
    counter!("alerts_total", "type" => alert_type, "outcome" => outcome).increment(1);
}

pub fn record_store_failure(operation: &'static str) {
    counter!("store_failures_total", "operation" => operation).increment(1);
}

pub fn record_notification(channel: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("alert_notifications_total", "channel" => channel, "outcome" => outcome).increment(1);
}
