//! Vector index abstraction: schema, records, queries and the backend trait.
//!
//! Two backends implement [`VectorIndex`]: the SQLite-backed [`crate::db::Db`]
//! and the REST [`remote::SearchServiceClient`].
pub mod hybrid;
pub mod remote;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RagError, Result};

/// Name of the approximate-nearest-neighbour configuration an index declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityAlgorithm {
    #[default]
    Hnsw,
}

impl SimilarityAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hnsw" => Some(Self::Hnsw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub dimension: usize,
    pub algorithm: SimilarityAlgorithm,
    /// Embedding model the index was built with, when the backend records it.
    pub model_id: Option<String>,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            algorithm: SimilarityAlgorithm::default(),
            model_id: None,
        }
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// One stored passage. `key` must come from [`crate::indexer::keys::encode`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub key: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Fields a query may ask the index to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectField {
    Key,
    Content,
}

#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub select: Vec<SelectField>,
    /// Lexical query evaluated against `content`; `None` or blank means
    /// pure vector search.
    pub lexical: Option<String>,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            select: vec![SelectField::Key, SelectField::Content],
            lexical: None,
        }
    }

    #[must_use]
    pub fn select(mut self, fields: &[SelectField]) -> Self {
        self.select = fields.to_vec();
        self
    }

    #[must_use]
    pub fn with_lexical(mut self, text: impl Into<String>) -> Self {
        self.lexical = Some(text.into());
        self
    }

    /// The lexical query, if it has any content.
    pub fn lexical_text(&self) -> Option<&str> {
        self.lexical.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn wants_content(&self) -> bool {
        self.select.contains(&SelectField::Content)
    }
}

/// A ranked query result. The key is always returned; `content` only when
/// selected.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub key: String,
    pub content: Option<String>,
    pub score: f32,
}

/// Storage for (key, content, embedding) records with similarity search.
///
/// Implementations must be safe for concurrent read-only use; ingestion is
/// assumed to be the only writer.
pub trait VectorIndex: Send + Sync {
    /// Create a new index. Fails if one with the same name exists.
    fn create_index(&self, schema: &IndexSchema) -> Result<()>;

    /// Delete an index and all its records. Returns whether it existed.
    fn delete_if_exists(&self, name: &str) -> Result<bool>;

    /// Look up the schema of an existing index.
    fn describe(&self, name: &str) -> Result<Option<IndexSchema>>;

    /// Insert or fully replace records by key.
    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<()>;

    /// Up to `k` hits ordered by descending score, ties by ascending key.
    fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<SearchHit>>;

    /// Number of records stored in the index.
    fn count(&self, name: &str) -> Result<usize>;

    /// Short backend label for logs.
    fn backend_name(&self) -> &'static str;

    /// Rebuild semantics: drop any prior index of that name, then create.
    ///
    /// Deletion failures are logged and ignored; creation failures are
    /// returned. Returns whether a prior index existed.
    fn create_schema(&self, schema: &IndexSchema) -> Result<bool> {
        validate_index_name(&schema.name)?;
        let existed = match self.delete_if_exists(&schema.name) {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Could not delete index `{}`: {e}", schema.name);
                false
            }
        };

        self.create_index(schema)?;
        info!(
            "Created index `{}` on {} ({} dims, {})",
            schema.name,
            self.backend_name(),
            schema.dimension,
            schema.algorithm.as_str()
        );
        Ok(existed)
    }
}

static INDEX_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]{0,127}$").expect("index name pattern is valid")
});

/// Index names: lowercase letters, digits and dashes, starting with a
/// letter or digit, at most 128 characters.
pub fn validate_index_name(name: &str) -> Result<()> {
    if INDEX_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(RagError::config(format!(
            "invalid index name `{name}`: use lowercase letters, digits and dashes"
        )))
    }
}

/// Check every record against the index dimension before anything is written.
pub(crate) fn check_records(schema: &IndexSchema, records: &[IndexRecord]) -> Result<()> {
    for record in records {
        if !crate::indexer::keys::is_safe_key(&record.key) {
            return Err(RagError::InvalidKey(record.key.clone()));
        }
        if record.embedding.len() != schema.dimension {
            return Err(RagError::DimensionMismatch {
                index: schema.name.clone(),
                expected: schema.dimension,
                actual: record.embedding.len(),
            });
        }
    }
    Ok(())
}

/// Order hits by descending score, breaking ties by ascending key.
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
}
