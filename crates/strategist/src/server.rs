//! HTTP API for report generation.
//!
//! Provides REST API endpoints for:
//! - Health checks
//! - Listing prompt templates, or one stage's template
//! - Collecting and analyzing a query
//! - Analyzing an uploaded dataset
//!
//! `/api` routes require `Authorization: Bearer <token>` when a token is
//! configured. A client that disconnects mid-request drops the handler, which
//! aborts its pending generation calls.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::analysis::{PromptTemplate, StageKind};
use crate::error::PipelineError;
use crate::pipeline::Orchestrator;
use crate::reddit::{CollectError, CollectRequest, Collector, Dataset, MAX_PAGE_SIZE};
use crate::report::{Report, ReportWriter};

/// Server state shared across handlers.
pub struct ServerState {
    /// Stage orchestrator
    pub orchestrator: Orchestrator,
    /// Post source
    pub collector: Arc<dyn Collector>,
    /// Report persistence; reports are only returned when unset
    pub writer: Option<ReportWriter>,
    /// Bearer token for `/api` routes
    pub api_token: Option<String>,
    /// Posts collected when a request does not say
    pub default_limit: usize,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/templates", get(templates_handler))
        .route("/api/templates/{stage}", get(template_handler))
        .route("/api/reports", post(report_handler))
        .route("/api/reports/analyze", post(analyze_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Strategist API listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Collect-and-analyze request.
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    /// Search query
    pub query: String,
    /// Posts to collect
    #[serde(default)]
    pub max_posts: Option<usize>,
    /// Subreddit listing instead of site-wide search
    #[serde(default)]
    pub subreddit: Option<String>,
    /// Sort order (`relevance`, `hot`, `top`, `new`, `comments`)
    #[serde(default)]
    pub sort: Option<String>,
    /// Time window (`hour` .. `all`)
    #[serde(default)]
    pub time_filter: Option<String>,
}

/// Analyze-only request.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Query to report on; defaults to the dataset's query
    #[serde(default)]
    pub query: Option<String>,
    /// Previously collected posts
    pub dataset: Dataset,
}

/// Report response.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    /// Report identifier
    pub id: String,
    /// Full report
    pub report: Report,
    /// Markdown rendering
    pub markdown: String,
    /// Files written, when persistence is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<SavedFiles>,
}

/// Files written for a report.
#[derive(Debug, Serialize)]
pub struct SavedFiles {
    /// Markdown path
    pub markdown: PathBuf,
    /// JSON path
    pub json: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<StageKind>,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    stage: Option<StageKind>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            stage: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
                stage: self.stage,
            }),
        )
            .into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::StageFailure { .. } | PipelineError::MalformedOutput { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::EmptyDataset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
            stage: err.stage(),
        }
    }
}

impl From<CollectError> for ApiError {
    fn from(err: CollectError) -> Self {
        let status = match &err {
            CollectError::MissingCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
            CollectError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn templates_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<PromptTemplate>>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.orchestrator.templates().templates().to_vec()))
}

async fn template_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(stage): Path<String>,
) -> Result<Json<PromptTemplate>, ApiError> {
    authorize(&state, &headers)?;

    let stage: StageKind = stage
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::NOT_FOUND, e))?;
    state
        .orchestrator
        .templates()
        .templates()
        .iter()
        .find(|t| t.stage == stage)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, format!("no template for stage '{stage}'"))
        })
}

/// Collect posts for a query and analyze them.
async fn report_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    authorize(&state, &headers)?;

    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "query must not be empty"));
    }

    let collect = CollectRequest {
        query: query.clone(),
        subreddit: request.subreddit.filter(|s| !s.trim().is_empty()),
        sort: parse_or_default(request.sort.as_deref())?,
        time_filter: parse_or_default(request.time_filter.as_deref())?,
        limit: request
            .max_posts
            .unwrap_or(state.default_limit)
            .clamp(1, MAX_PAGE_SIZE),
    };

    info!(query = %query, limit = collect.limit, "Received report request");
    let dataset = state.collector.collect(&collect).await.map_err(|e| {
        error!(query = %query, error = %e, "Collection failed");
        ApiError::from(e)
    })?;

    run_report(&state, dataset, &query).await
}

/// Analyze an uploaded dataset.
async fn analyze_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    authorize(&state, &headers)?;

    let query = request
        .query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| request.dataset.query.clone());

    info!(query = %query, posts = request.dataset.posts.len(), "Received analyze request");
    run_report(&state, request.dataset, &query).await
}

async fn run_report(
    state: &ServerState,
    dataset: Dataset,
    query: &str,
) -> Result<Json<ReportResponse>, ApiError> {
    let report = state
        .orchestrator
        .run_pipeline(dataset, query)
        .await
        .map_err(|e| {
            error!(query = %query, error = %e, "Pipeline failed");
            ApiError::from(e)
        })?;

    let saved = match &state.writer {
        Some(writer) => match writer.write(&report) {
            Ok(written) => Some(SavedFiles {
                markdown: written.markdown,
                json: written.json,
            }),
            Err(e) => {
                warn!(error = %e, "Failed to save report");
                None
            }
        },
        None => None,
    };

    Ok(Json(ReportResponse {
        id: report.id(),
        markdown: report.to_markdown(),
        report,
        saved,
    }))
}

fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(())
    } else {
        warn!("Rejected request with missing or invalid token");
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token"))
    }
}

fn parse_or_default<T>(value: Option<&str>) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = String> + Default,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map_err(|e: String| ApiError::new(StatusCode::BAD_REQUEST, e)),
        None => Ok(T::default()),
    }
}

