use super::{Db, serialize_vector};
use crate::error::Result;
use crate::index::{IndexRecord, check_records};
use rusqlite::params;

impl Db {
    /// Inserts or replaces a batch of records in one transaction.
    ///
    /// The whole batch is validated against the index dimension first, so a
    /// mismatching record leaves the index untouched.
    pub fn upsert_records(&self, name: &str, records: &[IndexRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let schema = Self::require_schema(&conn, name)?;
        check_records(&schema, records)?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO records (index_name, key, content, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(index_name, key) DO UPDATE SET
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    name,
                    record.key,
                    record.content,
                    serialize_vector(&record.embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
