use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{IndexRecord, IndexSchema, VectorIndex};
use crate::indexer::chunker::{self, Chunk, PageSource};
use crate::indexer::keys;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Drop and rebuild the index before uploading.
    pub recreate: bool,
    /// Skip uploading batches with an ordinal below this value.
    pub resume_from_batch: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            recreate: true,
            resume_from_batch: 0,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub documents_failed: usize,
    pub chunks: usize,
    pub empty_chunks: usize,
    pub records_uploaded: usize,
    pub batches_uploaded: usize,
    pub batches_skipped: usize,
}

/// Chunk → key → embed → upsert, in fixed-size batches.
pub struct Indexer {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    index_name: String,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        index_name: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            index_name: index_name.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Schema derived from the embedder, so every record it produces fits.
    pub fn schema(&self) -> IndexSchema {
        IndexSchema::new(&self.index_name, self.embedder.dimensions())
            .with_model_id(self.embedder.model_id())
    }

    /// Rebuild the index from scratch. Returns whether a prior index existed.
    pub fn create_index(&self) -> Result<bool> {
        self.index.create_schema(&self.schema())
    }

    /// Reuse the existing index when its schema agrees with the embedder,
    /// creating it when missing.
    fn open_index(&self) -> Result<()> {
        let expected = self.schema();
        match self.index.describe(&self.index_name)? {
            None => self.index.create_index(&expected),
            Some(existing) => {
                if existing.dimension != expected.dimension {
                    return Err(RagError::DimensionMismatch {
                        index: self.index_name.clone(),
                        expected: existing.dimension,
                        actual: expected.dimension,
                    });
                }
                match existing.model_id.as_deref() {
                    Some(id) if id != self.embedder.model_id() => Err(RagError::config(format!(
                        "index `{}` was built with model `{id}`, embedder is `{}`",
                        self.index_name,
                        self.embedder.model_id()
                    ))),
                    Some(_) => Ok(()),
                    None => {
                        warn!(
                            "Index `{}` does not record its embedding model; only the dimension was checked",
                            self.index_name
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    fn prepare(&self, options: IngestOptions) -> Result<()> {
        // Skipped batches only exist in an index that is kept
        if options.recreate && options.resume_from_batch > 0 {
            return Err(RagError::config(
                "resume_from_batch requires keeping the existing index",
            ));
        }
        if options.recreate {
            self.create_index().map(|_| ())
        } else {
            self.open_index()
        }
    }

    /// Ingest every supported document under `dir`, in sorted path order.
    ///
    /// Documents that cannot be opened are logged and skipped.
    pub fn ingest_directory<P: AsRef<Path>>(
        &self,
        dir: P,
        options: IngestOptions,
    ) -> Result<IngestReport> {
        let paths = chunker::discover_documents(dir.as_ref())?;
        info!(
            "Found {} documents in {}",
            paths.len(),
            dir.as_ref().display()
        );
        self.prepare(options)?;

        let mut batcher = Batcher::new(self, options.resume_from_batch);
        for path in &paths {
            match chunker::open_document(path) {
                Ok(doc) => batcher.push_document(doc.as_ref())?,
                Err(e) => {
                    warn!("Skipping document: {e}");
                    batcher.report.documents_failed += 1;
                }
            }
        }
        batcher.finish()
    }

    /// Ingest already opened sources, in the given order.
    pub fn ingest_sources(
        &self,
        sources: &[&dyn PageSource],
        options: IngestOptions,
    ) -> Result<IngestReport> {
        self.prepare(options)?;

        let mut batcher = Batcher::new(self, options.resume_from_batch);
        for source in sources {
            batcher.push_document(*source)?;
        }
        batcher.finish()
    }
}

/// Pending records of the batch being filled.
struct Batcher<'a> {
    indexer: &'a Indexer,
    resume_from: usize,
    pending: Vec<(String, String)>,
    next_batch: usize,
    /// Position of the next record across the whole run, seeds fallback keys.
    offset: usize,
    report: IngestReport,
}

impl<'a> Batcher<'a> {
    fn new(indexer: &'a Indexer, resume_from: usize) -> Self {
        Self {
            indexer,
            resume_from,
            pending: Vec::with_capacity(indexer.batch_size),
            next_batch: 0,
            offset: 0,
            report: IngestReport::default(),
        }
    }

    fn push_document(&mut self, source: &dyn PageSource) -> Result<()> {
        let before = self.report.chunks;
        for chunk in chunker::chunk(source) {
            self.push(chunk)?;
        }
        self.report.documents += 1;
        info!(
            "Chunked {} ({} pages)",
            source.path(),
            self.report.chunks - before
        );
        Ok(())
    }

    fn push(&mut self, chunk: Chunk) -> Result<()> {
        self.report.chunks += 1;
        if chunk.text.is_empty() {
            self.report.empty_chunks += 1;
            return Ok(());
        }

        let key = keys::encode_with_fallback(&chunk.provenance_id, &chunk.text, self.offset)?;
        self.offset += 1;
        self.pending.push((key, chunk.text));
        if self.pending.len() >= self.indexer.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let ordinal = self.next_batch;
        self.next_batch += 1;

        if ordinal < self.resume_from {
            self.report.batches_skipped += 1;
            return Ok(());
        }

        match self.upload(batch) {
            Ok(uploaded) => {
                self.report.records_uploaded += uploaded;
                self.report.batches_uploaded += 1;
                info!(
                    "Uploaded batch {} ({} records, {} total)",
                    ordinal, uploaded, self.report.records_uploaded
                );
                Ok(())
            }
            Err(e) => Err(RagError::PartialIngestion {
                failed_batch: ordinal,
                committed_batches: self.report.batches_uploaded,
                committed_records: self.report.records_uploaded,
                source: Box::new(e),
            }),
        }
    }

    fn upload(&self, batch: Vec<(String, String)>) -> Result<usize> {
        let texts: Vec<&str> = batch.iter().map(|(_, text)| text.as_str()).collect();
        let vectors = self.indexer.embedder.embed_batch(&texts)?;
        if vectors.len() != batch.len() {
            return Err(RagError::Embedder(
                crate::embedder::EmbedderError::InferenceFailed(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )),
            ));
        }

        let records: Vec<IndexRecord> = batch
            .into_iter()
            .zip(vectors)
            .map(|((key, content), embedding)| IndexRecord {
                key,
                content,
                embedding,
            })
            .collect();
        self.indexer
            .index
            .upsert(&self.indexer.index_name, &records)?;
        Ok(records.len())
    }

    fn finish(mut self) -> Result<IngestReport> {
        self.flush()?;
        info!(
            "Ingestion finished: {} documents, {} records in {} batches ({} skipped, {} empty pages)",
            self.report.documents,
            self.report.records_uploaded,
            self.report.batches_uploaded,
            self.report.batches_skipped,
            self.report.empty_chunks
        );
        Ok(self.report)
    }
}
