//! HTTP API server for feedback ingestion

use crate::error::FlagfeedError;
use crate::ingest::{FeedbackIngestor, IngestSummary};
use crate::statistics::{flush_once, FlushReport, StatisticsMerger};
use crate::types::FeedbackBatch;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server address
    pub addr: SocketAddr,
    /// Cutoff age used by on-demand flushes
    pub cutoff_age: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 8700).into(),
            cutoff_age: Duration::from_secs(120),
        }
    }
}

/// API server state
#[derive(Clone)]
struct AppState {
    ingestor: Arc<FeedbackIngestor>,
    merger: Arc<StatisticsMerger>,
    cutoff_age: Duration,
}

/// Error body returned for rejected requests
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub retryable: bool,
}

struct ApiError(FlagfeedError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlagfeedError::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            retryable: self.0.is_transient(),
        };
        (status, Json(body)).into_response()
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create new API server
    pub fn new(
        config: ApiServerConfig,
        ingestor: Arc<FeedbackIngestor>,
        merger: Arc<StatisticsMerger>,
    ) -> Self {
        let state = AppState {
            ingestor,
            merger,
            cutoff_age: config.cutoff_age,
        };
        Self { config, state }
    }

    /// Build router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/feedback", post(feedback_handler))
            .route("/v1/flush", post(flush_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        info!("API server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("API server stopped");
        Ok(())
    }
}

/// Feedback ingestion handler
async fn feedback_handler(
    State(state): State<AppState>,
    Json(batch): Json<FeedbackBatch>,
) -> Result<(StatusCode, Json<IngestSummary>), ApiError> {
    debug!("Received feedback for project {:?}", batch.project);
    let summary = state.ingestor.ingest(&batch).await.map_err(ApiError)?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// On-demand flush handler
async fn flush_handler(State(state): State<AppState>) -> Json<FlushReport> {
    let report = flush_once(state.ingestor.accumulator(), &state.merger, state.cutoff_age).await;
    Json(report)
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pending_buckets: usize,
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pending_buckets: state.ingestor.accumulator().pending_buckets(),
    })
}
