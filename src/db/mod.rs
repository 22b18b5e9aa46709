//! Local vector index using SQLite and sqlite-vec
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once};
use tracing::info;

use crate::error::{RagError, Result};
use crate::index::{IndexRecord, IndexSchema, SearchHit, SimilarityAlgorithm, VectorIndex, VectorQuery};

pub mod records;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS indexes (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    algorithm TEXT NOT NULL,
    model_id TEXT,
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    index_name TEXT NOT NULL,
    key TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (index_name, key),
    FOREIGN KEY (index_name) REFERENCES indexes(name) ON DELETE CASCADE
);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A SQLite-backed [`VectorIndex`] holding any number of named indexes.
///
/// The connection sits behind a mutex so one `Db` can be shared across
/// request handlers.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        // Register sqlite-vec extension globally
        init_sqlite_vec();

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::upstream("sqlite", None, format!("connection lock poisoned: {e}")))
    }

    /// Schema of `name`, read through an already locked connection.
    pub(crate) fn schema_of(conn: &Connection, name: &str) -> Result<Option<IndexSchema>> {
        let row = conn
            .query_row(
                "SELECT dimension, algorithm, model_id FROM indexes WHERE name = ?",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(dimension, algorithm, model_id)| IndexSchema {
            name: name.to_string(),
            dimension: dimension as usize,
            algorithm: SimilarityAlgorithm::parse(&algorithm).unwrap_or_default(),
            model_id,
        }))
    }

    pub(crate) fn require_schema(conn: &Connection, name: &str) -> Result<IndexSchema> {
        Self::schema_of(conn, name)?.ok_or_else(|| RagError::IndexNotFound(name.to_string()))
    }
}

impl VectorIndex for Db {
    fn create_index(&self, schema: &IndexSchema) -> Result<()> {
        crate::index::validate_index_name(&schema.name)?;
        if schema.dimension == 0 {
            return Err(RagError::config("index dimension must be positive"));
        }

        let conn = self.lock()?;
        if Self::schema_of(&conn, &schema.name)?.is_some() {
            return Err(RagError::config(format!(
                "index `{}` already exists",
                schema.name
            )));
        }
        conn.execute(
            "INSERT INTO indexes (name, dimension, algorithm, model_id, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                schema.name,
                schema.dimension as i64,
                schema.algorithm.as_str(),
                schema.model_id,
                chrono::Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn delete_if_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        // Cascades to records
        let rows = conn.execute("DELETE FROM indexes WHERE name = ?", params![name])?;
        Ok(rows > 0)
    }

    fn describe(&self, name: &str) -> Result<Option<IndexSchema>> {
        let conn = self.lock()?;
        Self::schema_of(&conn, name)
    }

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<()> {
        self.upsert_records(name, records)
    }

    fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        self.search(name, query)
    }

    fn count(&self, name: &str) -> Result<usize> {
        let conn = self.lock()?;
        Self::require_schema(&conn, name)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE index_name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Helper to serialize a float32 vector into the blob layout sqlite-vec reads
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory().expect("Failed to open in-memory DB");
        let conn = db.lock().unwrap();
        let tables: usize = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('indexes', 'records');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // 2.0f32 in hex: 0x40000000 -> little endian: 00 00 00 40
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_create_describe_delete() {
        let db = Db::open_in_memory().unwrap();
        let schema = IndexSchema::new("docs", 8).with_model_id("mock");

        assert!(db.describe("docs").unwrap().is_none());
        db.create_index(&schema).unwrap();
        assert_eq!(db.describe("docs").unwrap(), Some(schema.clone()));

        // A second plain create is refused
        assert!(db.create_index(&schema).is_err());

        assert!(db.delete_if_exists("docs").unwrap());
        assert!(!db.delete_if_exists("docs").unwrap());
        assert!(db.describe("docs").unwrap().is_none());
    }

    #[test]
    fn test_create_schema_replaces_existing() {
        let db = Db::open_in_memory().unwrap();
        assert!(!db.create_schema(&IndexSchema::new("docs", 4)).unwrap());
        db.upsert(
            "docs",
            &[IndexRecord {
                key: "a".to_string(),
                content: "x".to_string(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
            }],
        )
        .unwrap();
        assert_eq!(db.count("docs").unwrap(), 1);

        // Rebuild with a new dimension drops old records
        assert!(db.create_schema(&IndexSchema::new("docs", 2)).unwrap());
        assert_eq!(db.count("docs").unwrap(), 0);
        assert_eq!(db.describe("docs").unwrap().unwrap().dimension, 2);
    }

    #[test]
    fn test_count_missing_index() {
        let db = Db::open_in_memory().unwrap();
        assert!(matches!(db.count("nope"), Err(RagError::IndexNotFound(_))));
    }

    #[test]
    fn test_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        {
            let db = Db::open(&path).unwrap();
            db.create_index(&IndexSchema::new("docs", 3)).unwrap();
        }
        let db = Db::open(&path).unwrap();
        assert_eq!(db.describe("docs").unwrap().unwrap().dimension, 3);
    }
}
