//! Offline ingestion: documents → chunks → keys → embeddings → index.
pub mod chunker;
pub mod core;
pub mod keys;

pub use self::core::{IngestOptions, IngestReport, Indexer};
