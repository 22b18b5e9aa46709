use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groundrag::app::{self, AppContext};
use groundrag::config::Config;
use groundrag::embedder;
use groundrag::indexer::{IngestOptions, Indexer};
use groundrag::mcp::server::McpServer;
use groundrag::server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "groundrag", version, about = "Grounded question answering over your documents")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and upload every document of the documents directory
    Ingest {
        /// Documents directory (default: documents_dir from config)
        #[arg(long)]
        dir: Option<String>,
        /// Keep the existing index instead of rebuilding it
        #[arg(long)]
        keep_index: bool,
        /// Skip batches before this ordinal (resume a failed run, needs --keep-index)
        #[arg(long, default_value_t = 0, requires = "keep_index")]
        resume_from: usize,
    },
    /// Print the passages most similar to a query
    Search {
        query: String,
        /// Number of passages (default: search_top_k from config)
        #[arg(short, long)]
        k: Option<usize>,
        /// Combine keyword matching with vector similarity
        #[arg(long)]
        hybrid: bool,
    },
    /// Answer a question from the indexed documents
    Ask { question: String },
    /// Serve the HTTP API
    Serve {
        /// Listen address (default: server.addr from config)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Serve MCP tools over stdio
    Mcp,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output and the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Ingest {
            dir,
            keep_index,
            resume_from,
        } => {
            config.validate()?;
            let index = app::open_index(&config.index)?;
            let embedder = embedder::load_embedder(&config.model)?;
            let indexer = Indexer::new(index, embedder, &config.index_name, config.batch_size);
            let dir = dir.unwrap_or_else(|| config.documents_dir.clone());
            let options = IngestOptions {
                recreate: !keep_index,
                resume_from_batch: resume_from,
            };
            let report = indexer
                .ingest_directory(&dir, options)
                .with_context(|| format!("ingestion of {dir} failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query, k, hybrid } => {
            let ctx = AppContext::build(config)?;
            let retriever = ctx.retriever.clone().with_hybrid(hybrid || ctx.config.hybrid_search);
            let k = k.unwrap_or_else(|| retriever.default_k());
            let result = retriever.retrieve(&query, k)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Ask { question } => {
            config.validate_for_answering()?;
            let ctx = AppContext::build(config)?;
            let answer = ctx.rag()?.ask(&question)?;
            println!("{}", answer.answer);
            println!();
            for (i, source) in answer.sources.iter().enumerate() {
                println!("[DOC {}] {}", i + 1, source);
            }
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            let ctx = AppContext::build(config)?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            // Blocking HTTP clients must not be dropped inside the runtime
            runtime.block_on(server::serve(ctx.clone(), &addr))?;
        }
        Command::Mcp => {
            let ctx = AppContext::build(config)?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            runtime.block_on(McpServer::new(ctx.clone()).start())?;
        }
    }

    info!("Done");
    Ok(())
}
