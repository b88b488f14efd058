//! Core library for kbrelay.  This module wires the webhook pipeline into
//! an axum router and exposes the health and metrics endpoints.

mod config;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod knowledge;
pub mod pipeline;
pub mod question_log;
pub mod responder;
pub mod sanitize;
pub mod security_log;
pub mod sender;

pub use config::{AppConfig, RotationConfig};

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::ErrorClass;
use crate::pipeline::{Outcome, Pipeline};

/// Request counters exposed on `/metrics`.
#[derive(Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub halted_authorization: AtomicU64,
    pub halted_configuration: AtomicU64,
    pub halted_malformed_input: AtomicU64,
    pub halted_validation: AtomicU64,
    pub replies_total: AtomicU64,
    pub reply_failures_total: AtomicU64,
    pub log_failures_total: AtomicU64,
}

impl Metrics {
    fn halted_counter(&self, class: ErrorClass) -> &AtomicU64 {
        match class {
            ErrorClass::Authorization => &self.halted_authorization,
            ErrorClass::Configuration => &self.halted_configuration,
            ErrorClass::MalformedInput => &self.halted_malformed_input,
            ErrorClass::Validation => &self.halted_validation,
        }
    }

    fn observe(&self, outcome: &Outcome) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Halted(reason) => {
                self.halted_counter(reason.class())
                    .fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Replied {
                logged, delivered, ..
            } => {
                self.replies_total.fetch_add(1, Ordering::Relaxed);
                if !delivered {
                    self.reply_failures_total.fetch_add(1, Ordering::Relaxed);
                }
                if !logged {
                    self.log_failures_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Internal application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<Metrics>,
    pub process_start_instant: Instant,
}

/// Build state from environment variables (see [`AppConfig::from_env`]).
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    build_state(config, Arc::new(TracingSink))
}

/// Build state from an explicit configuration and diagnostics sink.
pub fn build_state(
    config: AppConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    if config.bot_token.chars().count() != gate::BOT_TOKEN_LEN {
        tracing::warn!("configured bot token is malformed; every delivery will be rejected");
    }
    if !std::path::Path::new(&config.knowledge_file).exists() {
        tracing::warn!(path = %config.knowledge_file, "knowledge document not found");
    }
    let pipeline = Pipeline::new(config.clone(), diagnostics)?;
    Ok(AppState {
        config,
        pipeline: Arc::new(pipeline),
        metrics: Arc::new(Metrics::default()),
        process_start_instant: Instant::now(),
    })
}

/// Build the Axum router.  Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the webhook
/// handler can see the caller address.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route(&state.config.webhook_path, post(webhook_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

/// Handler for the webhook.  Runs the pipeline and maps the outcome to a
/// plain-text response.
async fn webhook_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Bytes, BytesRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(b) => b,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            tracing::warn!(caller = %peer.ip(), "request body exceeded configured limit");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request too large").into_response();
        }
        Err(other) => return other.into_response(),
    };

    let outcome = state.pipeline.handle(peer.ip(), &body).await;
    state.metrics.observe(&outcome);
    match outcome {
        Outcome::Replied { .. } => (StatusCode::OK, "ok").into_response(),
        Outcome::Halted(reason) => (reason.class().status(), reason.to_string()).into_response(),
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "allowedRanges": state
            .pipeline
            .gate()
            .allowed_ranges()
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let m = &state.metrics;
    let mut buf = String::new();
    writeln!(
        &mut buf,
        "# HELP kbrelay_requests_total Webhook deliveries processed\n# TYPE kbrelay_requests_total counter"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_requests_total {}",
        m.requests_total.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP kbrelay_halted_total Deliveries halted before a reply, by class\n# TYPE kbrelay_halted_total counter"
    )
    .ok();
    for class in ErrorClass::ALL {
        writeln!(
            &mut buf,
            "kbrelay_halted_total{{class=\"{}\"}} {}",
            class.as_str(),
            m.halted_counter(class).load(Ordering::Relaxed)
        )
        .ok();
    }
    writeln!(
        &mut buf,
        "# HELP kbrelay_replies_total Replies attempted\n# TYPE kbrelay_replies_total counter"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_replies_total {}",
        m.replies_total.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP kbrelay_reply_failures_total Replies the chat platform did not accept\n# TYPE kbrelay_reply_failures_total counter"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_reply_failures_total {}",
        m.reply_failures_total.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP kbrelay_question_log_failures_total Questions that could not be appended to the log\n# TYPE kbrelay_question_log_failures_total counter"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_question_log_failures_total {}",
        m.log_failures_total.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP kbrelay_build_info Build information\n# TYPE kbrelay_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_build_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP kbrelay_process_uptime_seconds Process uptime seconds\n# TYPE kbrelay_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "kbrelay_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buf,
    )
        .into_response()
}
