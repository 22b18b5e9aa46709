//! Query-time retrieval: question → embedding → ranked passages.
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{SelectField, VectorIndex, VectorQuery};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub id: String,
    pub content: String,
    pub score: f32,
}

/// Passages ordered by descending score, ties by ascending id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub passages: Vec<Passage>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.passages.iter().map(|p| p.id.clone()).collect()
    }
}

/// Embeds questions with the ingestion embedder and queries the index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    index_name: String,
    default_k: usize,
    hybrid: bool,
}

impl Retriever {
    /// Build a retriever after checking the index was built with a
    /// compatible embedder.
    ///
    /// A missing index is tolerated (it may be built later in the process
    /// lifetime); a dimension or model disagreement is fatal.
    pub fn connect(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        index_name: impl Into<String>,
        default_k: usize,
    ) -> Result<Self> {
        let retriever = Self {
            index,
            embedder,
            index_name: index_name.into(),
            default_k,
            hybrid: false,
        };
        retriever.check_compatibility()?;
        Ok(retriever)
    }

    /// Combine lexical matching on the question with vector similarity.
    #[must_use]
    pub fn with_hybrid(mut self, hybrid: bool) -> Self {
        self.hybrid = hybrid;
        self
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Compare the stored index schema with the embedder.
    pub fn check_compatibility(&self) -> Result<()> {
        let Some(schema) = self.index.describe(&self.index_name)? else {
            warn!(
                "Index `{}` does not exist yet on {}; run ingestion before querying",
                self.index_name,
                self.index.backend_name()
            );
            return Ok(());
        };

        if schema.dimension != self.embedder.dimensions() {
            return Err(RagError::DimensionMismatch {
                index: self.index_name.clone(),
                expected: schema.dimension,
                actual: self.embedder.dimensions(),
            });
        }
        match schema.model_id.as_deref() {
            Some(id) if id != self.embedder.model_id() => Err(RagError::config(format!(
                "index `{}` was built with embedding model `{id}` but the configured model is `{}`",
                self.index_name,
                self.embedder.model_id()
            ))),
            Some(_) => Ok(()),
            None => {
                warn!(
                    "{} does not record the embedding model of `{}`; only the dimension was checked",
                    self.index.backend_name(),
                    self.index_name
                );
                Ok(())
            }
        }
    }

    /// Top `k` passages for `question`. A blank question is rejected before
    /// anything is embedded or sent; an index that does not exist yet yields
    /// an empty result.
    pub fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let vector = self.embedder.embed(question)?;
        let mut query =
            VectorQuery::new(vector, k).select(&[SelectField::Key, SelectField::Content]);
        if self.hybrid {
            query = query.with_lexical(question);
        }

        let hits = match self.index.query(&self.index_name, &query) {
            Ok(hits) => hits,
            // Not built yet: answer ungrounded instead of failing
            Err(RagError::IndexNotFound(name)) => {
                warn!("Index `{name}` does not exist; returning no passages");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        debug!("Retrieved {} passages for k={}", hits.len(), k);

        Ok(RetrievalResult {
            passages: hits
                .into_iter()
                .map(|hit| Passage {
                    id: hit.key,
                    content: hit.content.unwrap_or_default(),
                    score: hit.score,
                })
                .collect(),
        })
    }

    /// [`Self::retrieve`] with the configured default `k`.
    pub fn retrieve_default(&self, question: &str) -> Result<RetrievalResult> {
        self.retrieve(question, self.default_k)
    }
}
