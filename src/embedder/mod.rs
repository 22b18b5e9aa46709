/// Embedder trait and shared types for text embedding.
///
/// One embedder instance is built at process start and shared read-only;
/// the same model must serve ingestion and retrieval so that scores stay
/// comparable.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{EmbedderBackend, ModelConfig};
use crate::error::RagError;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings, one vector per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;
}

/// Build the configured embedder and verify its output dimension.
///
/// A probe embedding is computed once so that a model whose hidden size
/// disagrees with `model.dimensions` fails here instead of producing
/// meaningless scores later.
pub fn load_embedder(config: &ModelConfig) -> Result<Arc<dyn Embedder>, RagError> {
    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbedderBackend::Mock => Arc::new(mock::MockEmbedder::with_model_id(
            config.dimensions,
            &config.name,
        )),
        EmbedderBackend::Onnx => {
            let model_dir = config
                .model_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| download::default_model_dir(&config.name));
            download::download_model_files(&config.name, &model_dir)
                .map_err(|e| RagError::config(format!("model files unavailable: {e:#}")))?;
            Arc::new(onnx::OnnxEmbedder::new(
                &model_dir,
                &config.name,
                config.dimensions,
                config.embed_batch_size,
            )?)
        }
    };

    let probe = embedder.embed("dimension probe")?;
    if probe.len() != config.dimensions {
        return Err(RagError::config(format!(
            "model {} produces {}-dimensional vectors, configured dimensions is {}",
            config.name,
            probe.len(),
            config.dimensions
        )));
    }

    info!(
        "Embedder ready: {} ({} dims)",
        embedder.model_id(),
        embedder.dimensions()
    );
    Ok(embedder)
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec.iter_mut() {
        *v *= inv_norm;
    }
}

/// Reject NaN or infinite components before they reach the index.
pub(crate) fn ensure_finite(vec: &[f32]) -> Result<(), EmbedderError> {
    match vec.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(EmbedderError::InferenceFailed(format!(
            "non-finite value at component {i}"
        ))),
        None => Ok(()),
    }
}
