//! Prometheus metrics for MultiAuth
//!
//! Exposes metrics at `/metrics` endpoint in Prometheus format.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use multiauth_core::{Error, Result};
use tracing::debug;

use crate::server::AppState;

/// Metric names
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "multiauth_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "multiauth_http_request_duration_seconds";

    pub const LOGINS_TOTAL: &str = "multiauth_logins_total";
    pub const PROVIDER_ERRORS_TOTAL: &str = "multiauth_provider_errors_total";

    pub const UPTIME_SECONDS: &str = "multiauth_uptime_seconds";
    pub const INFO: &str = "multiauth_info";
}

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder globally
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| Error::Internal(format!("Failed to install Prometheus recorder: {}", e)))?;

        gauge!(names::INFO, "version" => multiauth_core::VERSION).set(1.0);

        Ok(Self {
            handle,
            start_time: Instant::now(),
        })
    }

    /// Recorder that is not installed globally; renders an empty page
    pub fn detached() -> Self {
        Self {
            handle: PrometheusBuilder::new().build_recorder().handle(),
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
        self.handle.render()
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration_secs: f64) {
        counter!(
            names::HTTP_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "status" => status.to_string(),
            "status_class" => format!("{}xx", status / 100)
        )
        .increment(1);

        histogram!(names::HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string()).record(duration_secs);
    }

    pub fn record_login(&self, provider: &str, success: bool) {
        counter!(
            names::LOGINS_TOTAL,
            "provider" => provider.to_string(),
            "status" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn record_provider_error(&self, error: &Error) {
        counter!(names::PROVIDER_ERRORS_TOTAL, "code" => error.code()).increment(1);
    }
}

/// Axum middleware for recording HTTP metrics
pub async fn metrics_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    state.metrics.record_http_request(&method, status, duration);

    debug!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %(duration * 1000.0),
        "Request completed"
    );

    response
}

/// Handler for /metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
