/// Process-wide components, constructed once at startup.
///
/// The index client and embedder are shared read-only by every request;
/// nothing here is a global.
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::config::{Config, IndexBackend, IndexConfig};
use crate::db::Db;
use crate::embedder::{self, Embedder};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::index::remote::SearchServiceClient;
use crate::indexer::Indexer;
use crate::rag::RagService;
use crate::rag::completion::{ChatCompletionClient, CompletionService};
use crate::rag::retriever::Retriever;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Retriever,
    /// `None` when no completion endpoint is configured.
    pub completion: Option<Arc<dyn CompletionService>>,
    /// Bounds concurrent embedding work on the serving paths.
    pub limiter: Arc<Semaphore>,
}

/// Open the configured vector index backend.
pub fn open_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.backend {
        IndexBackend::Local => Ok(Arc::new(Db::open(&config.db_path)?)),
        IndexBackend::Remote => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| RagError::config("index.endpoint is not set (SEARCH_ENDPOINT)"))?;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| RagError::config("index.api_key is not set (SEARCH_ADMIN_KEY)"))?;
            Ok(Arc::new(SearchServiceClient::new(
                endpoint,
                api_key,
                &config.api_version,
                config.timeout(),
            )?))
        }
    }
}

impl AppContext {
    /// Validate `config` and build every component it describes.
    pub fn build(config: Config) -> Result<Self> {
        config.validate()?;
        let index = open_index(&config.index)?;
        let embedder = embedder::load_embedder(&config.model)?;
        let completion: Option<Arc<dyn CompletionService>> =
            if config.llm.endpoint.is_some() && config.llm.api_key.is_some() {
                Some(Arc::new(ChatCompletionClient::from_config(&config.llm)?))
            } else {
                info!("No completion endpoint configured; `ask` is disabled");
                None
            };
        Self::from_parts(config, index, embedder, completion)
    }

    /// Assemble a context from already constructed components.
    pub fn from_parts(
        config: Config,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Result<Self> {
        let retriever = Retriever::connect(
            index.clone(),
            embedder.clone(),
            &config.index_name,
            config.search_top_k,
        )?
        .with_hybrid(config.hybrid_search);
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_embeddings.max(1)));

        info!(
            "Context ready: index `{}` on {}, embedder {}",
            config.index_name,
            index.backend_name(),
            embedder.model_id()
        );
        Ok(Self {
            config: Arc::new(config),
            index,
            embedder,
            retriever,
            completion,
            limiter,
        })
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            self.index.clone(),
            self.embedder.clone(),
            &self.config.index_name,
            self.config.batch_size,
        )
    }

    /// Answering service; fails when no completion endpoint is configured.
    pub fn rag(&self) -> Result<RagService> {
        let completion = self.completion.clone().ok_or_else(|| {
            RagError::config("answering requires llm.endpoint and llm.api_key (LLM_ENDPOINT, LLM_API_KEY)")
        })?;
        Ok(RagService::new(self.retriever.clone(), completion))
    }
}
