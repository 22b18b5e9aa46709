use super::{Db, serialize_vector};
use crate::error::{RagError, Result};
use crate::index::hybrid::{self, Candidate};
use crate::index::{SearchHit, VectorQuery};
use rusqlite::types::Value;

// NULL distances (zero vectors) rank as orthogonal
const VECTOR_SQL: &str = r#"
    SELECT
        key,
        content,
        COALESCE(vec_distance_cosine(embedding, ?), 1.0) AS distance
    FROM records
    WHERE index_name = ?
    ORDER BY distance ASC, key ASC
"#;

fn map_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    let distance: f64 = row.get(2)?;
    Ok(Candidate {
        key: row.get(0)?,
        content: row.get(1)?,
        vector_score: (1.0 - distance) as f32,
    })
}

impl Db {
    /// Exact cosine search, optionally fused with a lexical ranking.
    pub fn search(&self, name: &str, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        let conn = self.lock()?;
        let schema = Self::require_schema(&conn, name)?;
        if query.vector.len() != schema.dimension {
            return Err(RagError::DimensionMismatch {
                index: name.to_string(),
                expected: schema.dimension,
                actual: query.vector.len(),
            });
        }
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let lexical = query.lexical_text();

        // Hybrid ranking needs every candidate; pure vector search can stop at k
        let mut sql = String::from(VECTOR_SQL);
        let mut params: Vec<Value> = vec![
            Value::Blob(serialize_vector(&query.vector)),
            Value::Text(name.to_string()),
        ];
        if lexical.is_none() {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(query.k as i64));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_candidate)?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }

        let wants_content = query.wants_content();
        let hit = |c: Candidate, score: f32| SearchHit {
            key: c.key,
            content: wants_content.then_some(c.content),
            score,
        };

        let hits: Vec<SearchHit> = match lexical {
            None => candidates
                .into_iter()
                .map(|c| {
                    let score = c.vector_score;
                    hit(c, score)
                })
                .collect(),
            Some(text) => {
                let ranked = hybrid::fuse(&candidates, text);
                let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
                ranked
                    .into_iter()
                    .take(query.k)
                    .filter_map(|(i, score)| slots[i].take().map(|c| hit(c, score)))
                    .collect()
            }
        };

        Ok(hits)
    }
}
