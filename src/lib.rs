//! # groundrag: grounded retrieval-augmented generation
//!
//! Documents are split into page chunks, embedded, and stored in a vector
//! index; questions are embedded with the same model, matched against the
//! index, and the ranked passages are assembled into a citation-addressable
//! prompt for a chat completion service.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration with environment overrides
//! - **[`error`]**: Error taxonomy shared by ingestion and retrieval
//! - **[`embedder`]**: Text embedding via ONNX Runtime, plus a hashing mock
//! - **[`index`]**: Vector index trait, hybrid ranking, REST search-service client
//! - **[`db`]**: SQLite + sqlite-vec local index backend
//! - **[`indexer`]**: Page chunking, key encoding and batched ingestion
//! - **[`rag`]**: Retriever, context assembler and completion client
//! - **[`app`]**: Process-wide context built once at startup
//! - **[`server`]**: HTTP endpoints (axum)
//! - **[`mcp`]**: MCP tools over stdio (rmcp)

pub mod app;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod index;
pub mod indexer;
pub mod mcp;
pub mod rag;
pub mod server;

#[cfg(test)]
mod test_support;

pub use error::{RagError, Result};
