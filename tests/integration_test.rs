/// End-to-end integration tests for the groundrag pipeline.
///
/// Tests the complete flow:
///   Document → Chunker → Keys → Embedder → Index → Retriever → Prompt
use groundrag::db::Db;
use groundrag::embedder::Embedder;
use groundrag::embedder::mock::MockEmbedder;
use groundrag::error::RagError;
use groundrag::index::{IndexRecord, IndexSchema, VectorIndex, VectorQuery};
use groundrag::indexer::chunker::{self, InMemoryDocument, PageSource};
use groundrag::indexer::{IngestOptions, Indexer, keys};
use groundrag::rag::prompt;
use groundrag::rag::retriever::Retriever;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const INDEX: &str = "docs";

fn sample_document() -> InMemoryDocument {
    InMemoryDocument::new("./data/a.pdf", ["alpha content", "beta content"])
}

fn setup() -> (Arc<Db>, Arc<MockEmbedder>, Indexer) {
    let db = Arc::new(Db::open_in_memory().unwrap());
    let embedder = Arc::new(MockEmbedder::default());
    let indexer = Indexer::new(db.clone(), embedder.clone(), INDEX, 32);
    (db, embedder, indexer)
}

fn stored_keys(db: &Db) -> HashSet<String> {
    // Every record scores against a query of the right dimension
    let any_vector = MockEmbedder::default().embed("any text").unwrap();
    db.query(INDEX, &VectorQuery::new(any_vector, 1000))
        .unwrap()
        .into_iter()
        .map(|hit| hit.key)
        .collect()
}

/// Ingest a two-page document; keys derive from `{path}-p{n}`
#[test]
fn test_ingest_two_page_document() {
    let (db, _, indexer) = setup();
    let doc = sample_document();

    let report = indexer
        .ingest_sources(&[&doc], IngestOptions::default())
        .unwrap();

    assert_eq!(report.records_uploaded, 2);
    assert_eq!(db.count(INDEX).unwrap(), 2);

    let expected: HashSet<String> = ["./data/a.pdf-p0", "./data/a.pdf-p1"]
        .iter()
        .map(|id| keys::encode(id).unwrap())
        .collect();
    assert_eq!(stored_keys(&db), expected);
}

/// Query "what is alpha" with k=1 returns the alpha page
#[test]
fn test_query_returns_matching_page() {
    let (db, embedder, indexer) = setup();
    indexer
        .ingest_sources(&[&sample_document()], IngestOptions::default())
        .unwrap();

    let retriever = Retriever::connect(db, embedder, INDEX, 4).unwrap();
    let result = retriever.retrieve("what is alpha", 1).unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.passages[0].content, "alpha content");
    assert_eq!(
        result.passages[0].id,
        keys::encode("./data/a.pdf-p0").unwrap()
    );
}

/// Empty index: empty result, prompt still well formed
#[test]
fn test_empty_index_gives_contextless_prompt() {
    let (db, embedder, indexer) = setup();
    indexer.create_index().unwrap();

    let retriever = Retriever::connect(db, embedder, INDEX, 4).unwrap();
    let result = retriever.retrieve_default("what is alpha").unwrap();
    assert!(result.is_empty());

    let grounded = prompt::build_messages("what is alpha", &result);
    assert_eq!(grounded.messages.len(), 2);
    assert!(grounded.citations.is_empty());
    assert!(grounded.messages[1].content.contains("Question: what is alpha"));
}

/// Re-ingesting the same document overwrites instead of duplicating
#[test]
fn test_reingest_keeps_record_count() {
    let (db, _, indexer) = setup();
    let doc = sample_document();

    indexer
        .ingest_sources(&[&doc], IngestOptions::default())
        .unwrap();
    let first = stored_keys(&db);

    let keep = IngestOptions {
        recreate: false,
        resume_from_batch: 0,
    };
    indexer.ingest_sources(&[&doc], keep).unwrap();
    assert_eq!(db.count(INDEX).unwrap(), 2);
    assert_eq!(stored_keys(&db), first);

    // A full rebuild converges to the same state
    indexer
        .ingest_sources(&[&doc], IngestOptions::default())
        .unwrap();
    assert_eq!(db.count(INDEX).unwrap(), 2);
}

/// k=4 over more than four records: exactly four, non-increasing scores
#[test]
fn test_top_k_ordering() {
    let (db, embedder, indexer) = setup();
    let doc = InMemoryDocument::new(
        "./data/handbook.txt",
        [
            "rust ownership and borrowing",
            "rust traits and generics",
            "rust async programming",
            "cooking pasta at home",
            "rust error handling",
            "gardening in spring",
        ],
    );
    indexer
        .ingest_sources(&[&doc], IngestOptions::default())
        .unwrap();

    let retriever = Retriever::connect(db, embedder, INDEX, 4).unwrap();
    let result = retriever.retrieve_default("rust programming").unwrap();

    assert_eq!(result.len(), 4);
    assert!(
        result
            .passages
            .windows(2)
            .all(|w| w[0].score >= w[1].score),
        "scores must be non-increasing: {:?}",
        result.passages
    );
    assert_eq!(result.passages[0].content, "rust async programming");
}

/// Wrong-length embeddings never reach the index
#[test]
fn test_dimension_mismatch_is_rejected() {
    let db = Db::open_in_memory().unwrap();
    db.create_schema(&IndexSchema::new(INDEX, 4)).unwrap();

    let result = db.upsert(
        INDEX,
        &[IndexRecord {
            key: keys::encode("./data/a.pdf-p0").unwrap(),
            content: "alpha content".to_string(),
            embedding: vec![0.5; 3],
        }],
    );
    assert!(matches!(result, Err(RagError::DimensionMismatch { .. })));
    assert_eq!(db.count(INDEX).unwrap(), 0);
}

/// Embedding the same text twice gives the same vector
#[test]
fn test_embedding_is_deterministic() {
    let embedder = MockEmbedder::default();
    let a = embedder.embed("Répondre à partir des extraits").unwrap();
    let b = embedder.embed_batch(&["Répondre à partir des extraits"]).unwrap();
    assert_eq!(a.len(), embedder.dimensions());
    assert!(a.iter().zip(&b[0]).all(|(x, y)| (x - y).abs() < 1e-6));
}

/// Directory ingestion end to end, from files on disk
#[test]
fn test_ingest_directory_then_ask_prompt() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("data");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("guide.txt"),
        "Install the tool with cargo.\x0CRun the server with groundrag serve.",
    )
    .unwrap();
    fs::write(docs_dir.join("notes.md"), "Invoices are numbered per year.").unwrap();

    let (db, embedder, indexer) = setup();
    let report = indexer
        .ingest_directory(&docs_dir, IngestOptions::default())
        .unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(db.count(INDEX).unwrap(), 3);

    let retriever = Retriever::connect(db, embedder, INDEX, 2).unwrap();
    let result = retriever.retrieve_default("how are invoices numbered").unwrap();
    assert_eq!(result.passages[0].content, "Invoices are numbered per year.");

    let grounded = prompt::build_messages("how are invoices numbered", &result);
    assert_eq!(grounded.resolve(1), Some(result.passages[0].id.as_str()));
    assert!(grounded.messages[1].content.contains("[DOC 2]"));
}

/// Write a PDF with one line of Courier text per page.
fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// A real two-page PDF on disk: page text, provenance ids and stored keys
#[test]
fn test_ingest_two_page_pdf_from_disk() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("data");
    fs::create_dir_all(&docs_dir).unwrap();
    let pdf_path = docs_dir.join("a.pdf");
    write_pdf(&pdf_path, &["alpha content", "beta content"]);

    let doc = chunker::open_document(&pdf_path).unwrap();
    assert!(doc.path().ends_with("/data/a.pdf"));
    let chunks: Vec<_> = chunker::chunk(doc.as_ref()).collect();
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["alpha content", "beta content"]);
    let ids: Vec<String> = chunks.iter().map(|c| c.provenance_id.clone()).collect();
    assert_eq!(
        ids,
        vec![format!("{}-p0", doc.path()), format!("{}-p1", doc.path())]
    );

    let (db, embedder, indexer) = setup();
    let report = indexer
        .ingest_directory(&docs_dir, IngestOptions::default())
        .unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.records_uploaded, 2);

    let expected: HashSet<String> = ids.iter().map(|id| keys::encode(id).unwrap()).collect();
    assert_eq!(stored_keys(&db), expected);

    let retriever = Retriever::connect(db, embedder, INDEX, 4).unwrap();
    let result = retriever.retrieve("what is alpha", 1).unwrap();
    assert_eq!(result.passages[0].content, "alpha content");
    assert_eq!(result.passages[0].id, keys::encode(&ids[0]).unwrap());
}

/// A server started before ingestion retrieves nothing instead of failing
#[test]
fn test_retrieval_before_ingestion() {
    let db = Arc::new(Db::open_in_memory().unwrap());
    let retriever = Retriever::connect(db, Arc::new(MockEmbedder::default()), INDEX, 4).unwrap();
    let result = retriever.retrieve_default("what is alpha").unwrap();
    assert!(result.is_empty());
    let grounded = prompt::build_messages("what is alpha", &result);
    assert!(grounded.citations.is_empty());
}
