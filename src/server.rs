//! HTTP server exposing the session aggregate.
//!
//! ```text
//! capture context ──→ POST /v1/keystrokes ──→ SessionService ──→ verdict
//!                     POST /v1/paste               │
//!                     POST /v1/verify              ▼
//!                                             signed report
//! ```

use crate::config::Config;
use crate::protocol::{
    AcceptedResponse, EndSessionRequest, EndSessionResponse, ErrorResponse, KeystrokeBatchRequest,
    PasteEventRequest, SignReportRequest, StartSessionRequest, StartSessionResponse,
    VerifyReportRequest, VerifySessionRequest, VerifySessionResponse,
};
use crate::core::report::SignedReport;
use crate::service::{ServiceError, SessionAnalysis, SessionService};
use crate::session::aggregate::SessionError;
use crate::signing::verifier::VerificationReport;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// How often idle sessions are swept
    pub sweep_interval: Duration,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn from_config(port: u16, config: &Config) -> Self {
        Self {
            port,
            sweep_interval: Duration::from_secs((config.session_timeout_minutes * 60 / 4).max(1)),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(e: ServiceError) -> ApiError {
    let status = match &e {
        ServiceError::UnknownSession(_) => StatusCode::NOT_FOUND,
        ServiceError::SigningDisabled => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::MissingText(_) => StatusCode::BAD_REQUEST,
        ServiceError::Session(SessionError::Transport(_) | SessionError::Snapshot(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ServiceError::Session(_) => StatusCode::CONFLICT,
        ServiceError::Signature(_) => StatusCode::CONFLICT,
    };
    if status.is_server_error() {
        tracing::error!("request failed: {e}");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

/// GET /health
async fn health(State(service): State<Arc<SessionService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: service.session_count().await,
    })
}

/// POST /v1/sessions/start
async fn start_session(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<StartSessionResponse> {
    service.start_session(request).await.map(Json).map_err(api_error)
}

/// POST /v1/keystrokes
async fn keystrokes(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<KeystrokeBatchRequest>,
) -> ApiResult<AcceptedResponse> {
    service.keystroke_batch(request).await.map(Json).map_err(api_error)
}

/// POST /v1/paste
async fn paste(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<PasteEventRequest>,
) -> ApiResult<AcceptedResponse> {
    service.paste_event(request).await.map(Json).map_err(api_error)
}

/// POST /v1/verify
async fn verify_session(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<VerifySessionRequest>,
) -> ApiResult<VerifySessionResponse> {
    service.verify_session(request).await.map(Json).map_err(api_error)
}

/// POST /v1/sessions/end
async fn end_session(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<EndSessionRequest>,
) -> ApiResult<EndSessionResponse> {
    service.end_session(request).await.map(Json).map_err(api_error)
}

/// GET /v1/sessions/:id/analysis
async fn analysis(
    State(service): State<Arc<SessionService>>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SessionAnalysis> {
    service.analysis(session_id).await.map(Json).map_err(api_error)
}

/// POST /v1/reports/sign
async fn sign_report(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<SignReportRequest>,
) -> ApiResult<SignedReport> {
    service.sign_report(request).await.map(Json).map_err(api_error)
}

/// POST /v1/reports/verify
async fn verify_report(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<VerifyReportRequest>,
) -> Json<VerificationReport> {
    Json(service.verify_report(&request))
}

pub fn router(service: Arc<SessionService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions/start", post(start_session))
        .route("/v1/keystrokes", post(keystrokes))
        .route("/v1/paste", post(paste))
        .route("/v1/verify", post(verify_session))
        .route("/v1/sessions/end", post(end_session))
        .route("/v1/sessions/:id/analysis", get(analysis))
        .route("/v1/reports/sign", post(sign_report))
        .route("/v1/reports/verify", post(verify_report))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(service)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    service: SessionService,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let service = Arc::new(service);
    let app = router(service.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HumanSign aggregate listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let sweeper = {
        let service = service.clone();
        let period = config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = service.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "idle sessions swept");
                }
            }
        })
    };

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        sweeper.abort();
    });

    Ok((actual_addr, shutdown_tx))
}
