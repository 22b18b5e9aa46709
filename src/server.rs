//! HTTP surface: health check, grounded answers and raw retrieval.
use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::app::AppContext;
use crate::error::RagError;
use crate::rag::Answer;
use crate::rag::retriever::RetrievalResult;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// Error returned to HTTP callers. Only client errors carry details; the
/// rest are logged and answered generically.
#[derive(Debug)]
pub enum ApiError {
    Rag(RagError),
    Internal(String),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self::Rag(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Rag(err) if err.is_client_error() => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Rag(RagError::Configuration(msg)) => {
                error!("configuration error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service is not configured for this request".to_string(),
                )
            }
            ApiError::Rag(err @ RagError::Upstream { .. }) => {
                error!("{err}");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream service error".to_string(),
                )
            }
            ApiError::Rag(err) => {
                error!("request failed: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal service error".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                error!("request failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal service error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Run blocking index/embedder/completion work off the async workers,
/// holding one limiter permit for its duration.
async fn run_blocking<T, F>(ctx: &AppContext, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let permit = ctx
        .limiter
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| ApiError::Internal(format!("limiter closed: {e}")))?;
    // The permit lives as long as the work, even if the request is dropped
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    })
    .await
    .map_err(|e| ApiError::Internal(format!("worker failed: {e}")))?
    .map_err(ApiError::from)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ask(
    State(ctx): State<AppContext>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, ApiError> {
    if req.question.trim().is_empty() {
        return Err(RagError::EmptyInput.into());
    }
    let rag = ctx.rag()?;
    let answer = run_blocking(&ctx, move || rag.ask(&req.question)).await?;
    Ok(Json(answer))
}

async fn search(
    State(ctx): State<AppContext>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RetrievalResult>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(RagError::EmptyInput.into());
    }
    let retriever = ctx.retriever.clone();
    let k = req.top_k.unwrap_or_else(|| retriever.default_k());
    let result = run_blocking(&ctx, move || retriever.retrieve(&req.query, k)).await?;
    Ok(Json(result))
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/ask", post(ask))
        .route("/search", post(search))
        .with_state(ctx)
}

/// Serve until the process receives Ctrl-C.
pub async fn serve(ctx: AppContext, addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address `{addr}`"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Listening on http://{addr}");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;
    Ok(())
}
