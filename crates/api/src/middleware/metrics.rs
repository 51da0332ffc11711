//! Prometheus metrics: HTTP instrumentation, invitation lifecycle counters
//! and the `/metrics` scrape endpoint.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::app::AppState;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Records `http_requests_total` (method, path, status) and
/// `http_request_duration_seconds` (method, path).
///
/// `path` is the matched route template so ids and tokens never become labels.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = method_to_str(req.method());
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "http_requests_total",
        "method" => method,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(duration);

    response
}

fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

pub fn record_invitation_issued(notification_sent: bool) {
    counter!(
        "invitations_issued_total",
        "notification_sent" => notification_sent.to_string()
    )
    .increment(1);
}

/// `outcome` is one of `success`, `invalid`, `already_used`, `expired`,
/// `duplicate_account`, `provider_error` or `error`.
pub fn record_invitation_redeemed(outcome: &'static str) {
    counter!("invitations_redeemed_total", "outcome" => outcome).increment(1);
}

pub fn record_invitation_verified(outcome: &'static str) {
    counter!("invitations_verified_total", "outcome" => outcome).increment(1);
}

/// Renders the Prometheus text format. Pool gauges are sampled per scrape.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    persistence::metrics::record_pool_metrics(&state.pool);

    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Installs the global Prometheus recorder.
///
/// Must run once at startup before any metric is recorded. A second call
/// returns an error instead of replacing the recorder.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)?
        .install_recorder()?;

    // Lost race: another caller installed first; its handle stays authoritative.
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}
