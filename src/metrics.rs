//! Prometheus metrics for the IdP.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "samlidp_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "samlidp_http_request_duration_seconds";

/// Registered service providers (gauge).
pub const SERVICE_PROVIDERS: &str = "samlidp_service_providers";

/// IDP-initiated dispatches (counter). Labels: outcome.
pub const IDP_INITIATED_TOTAL: &str = "samlidp_idp_initiated_total";

/// Password logins (counter). Labels: outcome.
pub const LOGINS_TOTAL: &str = "samlidp_logins_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent, so tests may
/// call it repeatedly.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(SERVICE_PROVIDERS, "Service providers in the registry");
    describe_counter!(IDP_INITIATED_TOTAL, "IDP-initiated logins by outcome");
    describe_counter!(LOGINS_TOTAL, "Password logins by outcome");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to its route template so user-chosen ids never become
/// label values.
///
/// - `/users/alice` -> `/users/{id}`
/// - `/login/promo/campaign42` -> `/login/{shortcut}/{state}`
/// - anything unrouted -> `/{other}`
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["health" | "metrics" | "openapi.json" | "metadata" | "sso" | "login"] => path.to_string(),
        [kind @ ("services" | "users" | "shortcuts" | "sessions"), ""] => format!("/{kind}/"),
        [kind @ ("services" | "users" | "shortcuts" | "sessions"), _] => format!("/{kind}/{{id}}"),
        ["login", _] => "/login/{shortcut}".to_string(),
        ["login", _, _] => "/login/{shortcut}/{state}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics`: render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = init_metrics().render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
