/// MCP Tool handlers for groundrag.
///
/// 1. search – top-k passages for a question
/// 2. ask    – grounded answer with cited sources
/// 3. ingest – rebuild the index from the documents directory
///
/// Index, embedder and completion calls are blocking and run on the
/// blocking pool, gated by the shared limiter.
use crate::app::AppContext;
use crate::error::RagError;
use crate::indexer::IngestOptions;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Search query (natural language)
    query: String,
    /// Max results (default: search_top_k from config)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct AskParams {
    /// Question to answer from the indexed documents
    question: String,
}

#[derive(Deserialize, JsonSchema)]
struct IngestParams {
    /// Directory to ingest (default: documents_dir from config)
    directory: Option<String>,
    /// Keep the existing index instead of rebuilding it (default: false)
    keep_index: Option<bool>,
    /// Skip batches before this ordinal, to resume a failed run (needs keep_index=true)
    resume_from_batch: Option<usize>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Caller mistakes come back as tool errors; everything else is internal.
fn map_rag_error(err: RagError) -> Result<CallToolResult, McpError> {
    match err {
        RagError::EmptyInput | RagError::Configuration(_) => error_result(&err.to_string()),
        other => Err(McpError::internal_error(other.to_string(), None)),
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: AppContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

impl AppTools {
    async fn run_blocking<T, F>(&self, work: F) -> Result<crate::error::Result<T>, McpError>
    where
        F: FnOnce() -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .ctx
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| McpError::internal_error(format!("limiter closed: {e}"), None))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| McpError::internal_error(format!("worker failed: {e}"), None))
    }
}

#[tool_router]
impl AppTools {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: search ──────────────────────────────────────────────

    #[tool(description = "Vector similarity search over the indexed documents. Returns ranked passages with their ids.")]
    async fn search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }

        let retriever = self.ctx.retriever.clone();
        let top_k = p.top_k.unwrap_or_else(|| retriever.default_k());
        match self
            .run_blocking(move || retriever.retrieve(&p.query, top_k))
            .await?
        {
            Ok(result) => json_result(serde_json::json!({
                "count": result.len(),
                "results": result.passages,
            })),
            Err(e) => map_rag_error(e),
        }
    }

    // ── Tool 2: ask ─────────────────────────────────────────────────

    #[tool(description = "Answer a question from the indexed documents. The answer cites passages as [DOC n]; sources lists their ids in the same order.")]
    async fn ask(&self, params: Parameters<AskParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.question.trim().is_empty() {
            return error_result("question is required");
        }

        let rag = match self.ctx.rag() {
            Ok(rag) => rag,
            Err(e) => return map_rag_error(e),
        };
        match self.run_blocking(move || rag.ask(&p.question)).await? {
            Ok(answer) => json_result(serde_json::json!(answer)),
            Err(e) => map_rag_error(e),
        }
    }

    // ── Tool 3: ingest ──────────────────────────────────────────────

    #[tool(description = "Ingest the documents directory (PDF, txt, md) into the vector index. Rebuilds the index unless keep_index is true.")]
    async fn ingest(&self, params: Parameters<IngestParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let dir = p
            .directory
            .unwrap_or_else(|| self.ctx.config.documents_dir.clone());
        let options = IngestOptions {
            recreate: !p.keep_index.unwrap_or(false),
            resume_from_batch: p.resume_from_batch.unwrap_or(0),
        };

        let indexer = self.ctx.indexer();
        match self
            .run_blocking(move || indexer.ingest_directory(&dir, options))
            .await?
        {
            Ok(report) => json_result(serde_json::json!({
                "success": true,
                "report": report,
            })),
            Err(e) => match &e {
                RagError::PartialIngestion { failed_batch, .. } => error_result(&format!(
                    "{e}. Re-run with keep_index=true and resume_from_batch={failed_batch}"
                )),
                RagError::Document { .. } => error_result(&e.to_string()),
                _ => map_rag_error(e),
            },
        }
    }
}
