//! Error taxonomy shared by the ingestion and retrieval paths.
use thiserror::Error;

use crate::embedder::EmbedderError;

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or inconsistent settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dimension mismatch for index `{index}`: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("index `{0}` does not exist")]
    IndexNotFound(String),

    /// Non-success answer from the vector index or completion service.
    #[error("{service} request failed{}: {message}", status_suffix(.status))]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("question must not be empty")]
    EmptyInput,

    /// A batch upload failed; earlier batches stay in the index.
    #[error(
        "ingestion aborted at batch {failed_batch} ({committed_batches} batches / {committed_records} records committed): {source}"
    )]
    PartialIngestion {
        failed_batch: usize,
        committed_batches: usize,
        committed_records: usize,
        #[source]
        source: Box<RagError>,
    },

    #[error("{path}: {message}")]
    Document { path: String, message: String },

    #[error("invalid key `{0}`")]
    InvalidKey(String),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn document(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Document {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn upstream(service: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status,
            message: message.into(),
        }
    }

    /// Whether the failure was caused by the caller rather than the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyInput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_with_status() {
        let err = RagError::upstream("search", Some(503), "busy");
        assert_eq!(err.to_string(), "search request failed (503): busy");
    }

    #[test]
    fn test_upstream_display_without_status() {
        let err = RagError::upstream("completion", None, "timed out");
        assert_eq!(err.to_string(), "completion request failed: timed out");
    }

    #[test]
    fn test_partial_ingestion_keeps_cause() {
        let err = RagError::PartialIngestion {
            failed_batch: 3,
            committed_batches: 3,
            committed_records: 96,
            source: Box::new(RagError::upstream("search", Some(500), "boom")),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch 3"));
        assert!(msg.contains("96 records"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(RagError::EmptyInput.is_client_error());
        assert!(!RagError::config("x").is_client_error());
    }
}
