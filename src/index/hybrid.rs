//! Lexical scoring and rank fusion for hybrid queries.
//!
//! Vector and lexical rankings are merged with Reciprocal Rank Fusion, the
//! same combination hosted search services apply to hybrid requests.
use std::collections::{HashMap, HashSet};

/// RRF smoothing constant.
const RRF_K: f32 = 60.0;
const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// A candidate already scored by vector similarity.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: String,
    pub content: String,
    pub vector_score: f32,
}

/// Lowercase alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// BM25 score of every document against the query terms.
///
/// Documents without any query term score exactly zero.
pub fn bm25_scores(query: &str, documents: &[&str]) -> Vec<f32> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || documents.is_empty() {
        return vec![0.0; documents.len()];
    }

    let docs: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();
    let n = docs.len() as f32;
    let avg_len = docs.iter().map(Vec::len).sum::<usize>() as f32 / n;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in &terms {
            if unique.contains(term.as_str()) {
                *doc_freq.entry(term.as_str()).or_default() += 1;
            }
        }
    }

    docs.iter()
        .map(|doc| {
            let len_norm = if avg_len > 0.0 {
                doc.len() as f32 / avg_len
            } else {
                0.0
            };
            terms
                .iter()
                .map(|term| {
                    let tf = doc.iter().filter(|t| *t == term).count() as f32;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let df = doc_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
                    let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                    idf * tf * (BM25_K1 + 1.0)
                        / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm))
                })
                .sum()
        })
        .collect()
}

/// Fuse vector and lexical rankings; returns `(candidate index, score)`
/// ordered by descending fused score, ties by ascending key.
pub fn fuse(candidates: &[Candidate], lexical_query: &str) -> Vec<(usize, f32)> {
    let mut by_vector: Vec<usize> = (0..candidates.len()).collect();
    by_vector.sort_by(|&a, &b| {
        candidates[b]
            .vector_score
            .total_cmp(&candidates[a].vector_score)
            .then_with(|| candidates[a].key.cmp(&candidates[b].key))
    });

    let contents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
    let lexical = bm25_scores(lexical_query, &contents);
    let mut by_lexical: Vec<usize> = (0..candidates.len())
        .filter(|&i| lexical[i] > 0.0)
        .collect();
    by_lexical.sort_by(|&a, &b| {
        lexical[b]
            .total_cmp(&lexical[a])
            .then_with(|| candidates[a].key.cmp(&candidates[b].key))
    });

    let mut fused = vec![0.0f32; candidates.len()];
    for (rank, &i) in by_vector.iter().enumerate() {
        fused[i] += 1.0 / (RRF_K + rank as f32 + 1.0);
    }
    for (rank, &i) in by_lexical.iter().enumerate() {
        fused[i] += 1.0 / (RRF_K + rank as f32 + 1.0);
    }

    let mut ranked: Vec<(usize, f32)> = fused.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| candidates[a.0].key.cmp(&candidates[b.0].key))
    });
    ranked
}
