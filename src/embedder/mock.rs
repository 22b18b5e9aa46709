/// Mock embedder for tests and offline runs.
///
/// Produces deterministic feature-hashed bag-of-words vectors, so texts that
/// share words land close to each other. No model files are needed.
///
/// Buckets come from FNV-1a over the token's UTF-8 bytes, so vectors are
/// identical on every toolchain and platform.
use super::{Embedder, EmbedderError, l2_normalize};

const MOCK_MODEL_ID: &str = "mock-hashed-bow";
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// A mock embedder that hashes lowercase word tokens into buckets.
pub struct MockEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self::with_model_id(dimensions, MOCK_MODEL_ID)
    }

    /// Create a `MockEmbedder` reporting a specific model identifier.
    #[must_use]
    pub fn with_model_id(dimensions: usize, model_id: &str) -> Self {
        Self {
            dimensions,
            model_id: model_id.to_string(),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if self.dimensions == 0 {
            return Err(EmbedderError::InferenceFailed(
                "zero-dimensional embedder".to_string(),
            ));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            embedding[bucket] += 1.0;
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
