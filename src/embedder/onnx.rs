/// ONNX Runtime embedder using the `ort` crate.
///
/// Loads a sentence-transformers ONNX export, runs batched inference,
/// applies mean pooling with the attention mask, and L2-normalizes the
/// result.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{BertTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError, ensure_finite, l2_normalize};

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    model_id: String,
    dimensions: usize,
    batch_size: usize,
}

impl OnnxEmbedder {
    /// Create a new `OnnxEmbedder` by loading a model from the given directory.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in `model_dir`.
    pub fn new(
        model_dir: &Path,
        model_id: &str,
        dimensions: usize,
        batch_size: usize,
    ) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        info!("ONNX model loaded: {model_id}");

        let tokenizer = BertTokenizer::from_model_dir(model_dir)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: model_id.to_string(),
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    /// Run one forward pass over an already padded batch.
    fn run_batch(&self, batch: &[TokenizerOutput]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let rows = batch.len();
        let seq_len = batch.iter().map(|t| t.input_ids.len()).max().unwrap_or(0);
        if rows == 0 || seq_len == 0 {
            return Ok(vec![vec![0.0; self.dimensions]; rows]);
        }

        // Flatten into [rows, seq_len], padding short rows with masked zeros
        let mut input_ids = Vec::with_capacity(rows * seq_len);
        let mut attention_mask = Vec::with_capacity(rows * seq_len);
        for tokens in batch {
            let pad = seq_len - tokens.input_ids.len();
            input_ids.extend_from_slice(&tokens.input_ids);
            input_ids.extend(std::iter::repeat_n(0i64, pad));
            attention_mask.extend_from_slice(&tokens.attention_mask);
            attention_mask.extend(std::iter::repeat_n(0i64, pad));
        }

        let input_ids_val = Tensor::from_array(([rows, seq_len], input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array(([rows, seq_len], attention_mask.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
        let token_type_ids_val = Tensor::from_array(([rows, seq_len], vec![0i64; rows * seq_len]))
            .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Output shape: [rows, seq_len, hidden_size]
        let (_shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let hidden_size = hidden_data.len() / (rows * seq_len);
        if hidden_size != self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "model hidden size {hidden_size} differs from configured {}",
                self.dimensions
            )));
        }

        let row_len = seq_len * hidden_size;
        let mut embeddings = Vec::with_capacity(rows);
        for r in 0..rows {
            let hidden = &hidden_data[r * row_len..(r + 1) * row_len];
            let mask = &attention_mask[r * seq_len..(r + 1) * seq_len];
            let mut embedding = mean_pooling(hidden, mask, seq_len, hidden_size);
            l2_normalize(&mut embedding);
            ensure_finite(&embedding)?;
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut out = self.embed_batch(&[text])?;
        out.pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty model output".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for group in texts.chunks(self.batch_size) {
            let tokens = self
                .tokenizer
                .tokenize_batch(group)
                .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;
            embeddings.extend(self.run_batch(&tokens)?);
            debug!("embedded {} of {} texts", embeddings.len(), texts.len());
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    // Average by number of real tokens
    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}
