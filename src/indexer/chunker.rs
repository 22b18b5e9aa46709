//! Page-level chunking of source documents.
//!
//! Every page yields exactly one chunk, even when no text could be
//! extracted, so provenance ids stay aligned with page numbers. Dropping
//! empty chunks is left to the ingestion pipeline.
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use crate::error::{RagError, Result};

/// Page separator in plain-text documents.
const FORM_FEED: char = '\x0C';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `{document_path}-p{ordinal}`
    pub provenance_id: String,
    pub text: String,
    pub ordinal: usize,
}

/// A document that can be read page by page.
pub trait PageSource {
    /// Path used in provenance ids, with `/` separators.
    fn path(&self) -> &str;

    fn page_count(&self) -> usize;

    /// Text of the 0-based page `index`; empty when nothing is extractable.
    fn page_text(&self, index: usize) -> String;
}

/// Lazily chunk `source`, one chunk per page in page order.
pub fn chunk(source: &dyn PageSource) -> PageChunks<'_> {
    PageChunks {
        source,
        next: 0,
        total: source.page_count(),
    }
}

/// Iterator returned by [`chunk`]. Page text is only extracted when the
/// corresponding chunk is pulled.
pub struct PageChunks<'a> {
    source: &'a dyn PageSource,
    next: usize,
    total: usize,
}

impl Iterator for PageChunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.total {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;
        Some(Chunk {
            provenance_id: format!("{}-p{}", self.source.path(), ordinal),
            text: self.source.page_text(ordinal).trim().to_string(),
            ordinal,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PageChunks<'_> {}

fn provenance_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ── Backends ─────────────────────────────────────────────────────────

/// PDF read through lopdf.
pub struct PdfDocument {
    path: String,
    doc: lopdf::Document,
    /// 1-based lopdf page numbers in page order.
    page_numbers: Vec<u32>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = lopdf::Document::load(path)
            .map_err(|e| RagError::document(provenance_path(path), format!("failed to load PDF: {e}")))?;
        let mut page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        Ok(Self {
            path: provenance_path(path),
            doc,
            page_numbers,
        })
    }
}

impl PageSource for PdfDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_text(&self, index: usize) -> String {
        let Some(&number) = self.page_numbers.get(index) else {
            return String::new();
        };
        match self.doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                debug!("{}: no text on page {}: {e}", self.path, index);
                String::new()
            }
        }
    }
}

/// Plain text or markdown; form feeds separate pages.
pub struct TextDocument {
    path: String,
    pages: Vec<String>,
}

impl TextDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RagError::document(provenance_path(path), e.to_string()))?;
        Ok(Self {
            path: provenance_path(path),
            pages: content.split(FORM_FEED).map(str::to_string).collect(),
        })
    }
}

impl PageSource for TextDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, index: usize) -> String {
        self.pages.get(index).cloned().unwrap_or_default()
    }
}

/// Pre-extracted pages held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDocument {
    path: String,
    pages: Vec<String>,
}

impl InMemoryDocument {
    pub fn new<S: Into<String>>(path: impl Into<String>, pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into().replace('\\', "/"),
            pages: pages.into_iter().map(Into::into).collect(),
        }
    }
}

impl PageSource for InMemoryDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, index: usize) -> String {
        self.pages.get(index).cloned().unwrap_or_default()
    }
}

// ── Discovery ────────────────────────────────────────────────────────

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Checks if a file extension is supported
fn is_supported_extension(ext: &str) -> bool {
    matches!(ext, "pdf" | "txt" | "md")
}

/// Open `path` with the backend matching its extension.
pub fn open_document(path: &Path) -> Result<Box<dyn PageSource>> {
    match extension(path).as_str() {
        "pdf" => Ok(Box::new(PdfDocument::open(path)?)),
        "txt" | "md" => Ok(Box::new(TextDocument::open(path)?)),
        other => Err(RagError::document(
            provenance_path(path),
            format!("unsupported document type `{other}`"),
        )),
    }
}

/// Supported documents under `dir`, sorted so batch boundaries are
/// reproducible between runs.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RagError::document(
            provenance_path(dir),
            "documents directory not found",
        ));
    }

    // Walk builder respects .gitignore by default
    let walker = WalkBuilder::new(dir).hidden(false).build();
    let mut paths: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .map(|e| e.into_path())
        .filter(|p| is_supported_extension(&extension(p)))
        .collect();
    paths.sort();
    Ok(paths)
}
