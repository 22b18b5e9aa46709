//! REST client for a hosted search service (Azure AI Search wire format).
//!
//! Every call carries the shared admin `api-key` header and fails on the
//! configured timeout. Nothing is retried here; upserts are idempotent so
//! callers may retry them.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    IndexRecord, IndexSchema, SearchHit, SelectField, SimilarityAlgorithm, VectorIndex,
    VectorQuery, check_records, sort_hits,
};
use crate::error::{RagError, Result};

const SERVICE: &str = "search";
const KEY_FIELD: &str = "id";
const CONTENT_FIELD: &str = "content";
const VECTOR_FIELD: &str = "embedding";
const ALGORITHM_NAME: &str = "hnsw-config";
const PROFILE_NAME: &str = "hnsw-profile";

/// Blocking client for the search service's index and document APIs.
pub struct SearchServiceClient {
    client: Client,
    endpoint: String,
    api_version: String,
    /// Dimensions seen through create/describe, used to reject bad batches
    /// before they are sent.
    dimensions: Mutex<HashMap<String, usize>>,
}

impl SearchServiceClient {
    pub fn new(endpoint: &str, api_key: &str, api_version: &str, timeout: Duration) -> Result<Self> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RagError::config("search endpoint must be an http(s) URL"));
        }
        if api_key.trim().is_empty() {
            return Err(RagError::config("missing search api key"));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| RagError::config("invalid search api key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::config(format!("failed to build search HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            dimensions: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?api-version={}", self.endpoint, path, self.api_version)
    }

    fn remember_dimension(&self, name: &str, dimension: Option<usize>) {
        if let Ok(mut dims) = self.dimensions.lock() {
            match dimension {
                Some(d) => {
                    dims.insert(name.to_string(), d);
                }
                None => {
                    dims.remove(name);
                }
            }
        }
    }

    fn known_dimension(&self, name: &str) -> Option<usize> {
        self.dimensions.lock().ok()?.get(name).copied()
    }
}

fn send_error(e: reqwest::Error) -> RagError {
    let reason = if e.is_timeout() { "timed out" } else { "transport error" };
    RagError::upstream(SERVICE, None, format!("{reason}: {e}"))
}

/// Turn any non-2xx response into an upstream error carrying the body.
fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(RagError::upstream(SERVICE, Some(status.as_u16()), truncate(&body, 512)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T> {
    resp.json()
        .map_err(|e| RagError::upstream(SERVICE, None, format!("malformed response: {e}")))
}

// ── Wire format ──────────────────────────────────────────────────────

fn index_definition(schema: &IndexSchema) -> serde_json::Value {
    json!({
        "name": schema.name,
        "fields": [
            { "name": KEY_FIELD, "type": "Edm.String", "key": true, "filterable": true },
            { "name": CONTENT_FIELD, "type": "Edm.String", "searchable": true },
            {
                "name": VECTOR_FIELD,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": schema.dimension,
                "vectorSearchProfile": PROFILE_NAME,
            },
        ],
        "vectorSearch": {
            "algorithms": [{ "name": ALGORITHM_NAME, "kind": schema.algorithm.as_str() }],
            "profiles": [{ "name": PROFILE_NAME, "algorithm": ALGORITHM_NAME }],
        },
    })
}

#[derive(Debug, Deserialize)]
struct IndexDefinition {
    name: String,
    #[serde(default)]
    fields: Vec<FieldDefinition>,
    #[serde(default, rename = "vectorSearch")]
    vector_search: Option<VectorSearchDefinition>,
}

#[derive(Debug, Deserialize)]
struct FieldDefinition {
    name: String,
    #[serde(default)]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct VectorSearchDefinition {
    #[serde(default)]
    algorithms: Vec<AlgorithmDefinition>,
}

#[derive(Debug, Deserialize)]
struct AlgorithmDefinition {
    kind: String,
}

impl IndexDefinition {
    fn into_schema(self) -> Result<IndexSchema> {
        let dimension = self
            .fields
            .iter()
            .find(|f| f.name == VECTOR_FIELD)
            .and_then(|f| f.dimensions)
            .ok_or_else(|| {
                RagError::config(format!(
                    "index `{}` has no `{VECTOR_FIELD}` vector field",
                    self.name
                ))
            })?;
        let algorithm = self
            .vector_search
            .and_then(|vs| vs.algorithms.into_iter().next())
            .and_then(|a| SimilarityAlgorithm::parse(&a.kind))
            .unwrap_or_default();

        Ok(IndexSchema {
            name: self.name,
            dimension,
            algorithm,
            model_id: None,
        })
    }
}

#[derive(Serialize)]
struct UploadBatch<'a> {
    value: Vec<UploadAction<'a>>,
}

#[derive(Serialize)]
struct UploadAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    id: &'a str,
    content: &'a str,
    embedding: &'a [f32],
}

impl<'a> UploadBatch<'a> {
    fn new(records: &'a [IndexRecord]) -> Self {
        Self {
            value: records
                .iter()
                .map(|r| UploadAction {
                    // `upload` replaces the whole document
                    action: "upload",
                    id: &r.key,
                    content: &r.content,
                    embedding: &r.embedding,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    value: Vec<UploadResult>,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    key: String,
    status: bool,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

fn search_body(query: &VectorQuery) -> serde_json::Value {
    let mut select = vec![KEY_FIELD];
    if query.wants_content() {
        select.push(CONTENT_FIELD);
    }
    json!({
        "search": query.lexical_text().unwrap_or(""),
        "vectorQueries": [{
            "kind": "vector",
            "vector": query.vector,
            "k": query.k,
            "fields": VECTOR_FIELD,
        }],
        "select": select.join(","),
        "top": query.k,
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    #[serde(rename = "@search.score")]
    score: f64,
    id: String,
    #[serde(default)]
    content: Option<String>,
}

fn parse_count(body: &str) -> Result<usize> {
    body.trim_start_matches('\u{feff}')
        .trim()
        .parse()
        .map_err(|e| RagError::upstream(SERVICE, None, format!("malformed count `{body}`: {e}")))
}

// ── VectorIndex impl ─────────────────────────────────────────────────

impl VectorIndex for SearchServiceClient {
    fn create_index(&self, schema: &IndexSchema) -> Result<()> {
        let resp = self
            .client
            .put(self.url(&format!("indexes/{}", schema.name)))
            .json(&index_definition(schema))
            .send()
            .map_err(send_error)?;
        check_status(resp)?;
        self.remember_dimension(&schema.name, Some(schema.dimension));
        Ok(())
    }

    fn delete_if_exists(&self, name: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(self.url(&format!("indexes/{name}")))
            .send()
            .map_err(send_error)?;
        self.remember_dimension(name, None);
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(resp)?;
        Ok(true)
    }

    fn describe(&self, name: &str) -> Result<Option<IndexSchema>> {
        let resp = self
            .client
            .get(self.url(&format!("indexes/{name}")))
            .send()
            .map_err(send_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let definition: IndexDefinition = decode(check_status(resp)?)?;
        let schema = definition.into_schema()?;
        self.remember_dimension(name, Some(schema.dimension));
        Ok(Some(schema))
    }

    fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(dimension) = self.known_dimension(name) {
            check_records(&IndexSchema::new(name, dimension), records)?;
        }

        let resp = self
            .client
            .post(self.url(&format!("indexes/{name}/docs/index")))
            .json(&UploadBatch::new(records))
            .send()
            .map_err(send_error)?;
        let status = check_status(resp)?;
        let multi_status = status.status() == StatusCode::MULTI_STATUS;
        let body: UploadResponse = decode(status)?;

        let failed: Vec<String> = body
            .value
            .into_iter()
            .filter(|r| !r.status)
            .map(|r| format!("{}: {}", r.key, r.error_message.unwrap_or_default()))
            .collect();
        if multi_status || !failed.is_empty() {
            return Err(RagError::upstream(
                SERVICE,
                Some(207),
                format!("{} documents rejected ({})", failed.len(), failed.join("; ")),
            ));
        }
        debug!("uploaded {} documents to `{name}`", records.len());
        Ok(())
    }

    fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        if let Some(dimension) = self.known_dimension(name) {
            if query.vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    index: name.to_string(),
                    expected: dimension,
                    actual: query.vector.len(),
                });
            }
        }
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(self.url(&format!("indexes/{name}/docs/search")))
            .json(&search_body(query))
            .send()
            .map_err(send_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RagError::IndexNotFound(name.to_string()));
        }
        let body: SearchResponse = decode(check_status(resp)?)?;

        let wants_content = query.select.contains(&SelectField::Content);
        let mut hits: Vec<SearchHit> = body
            .value
            .into_iter()
            .map(|doc| SearchHit {
                key: doc.id,
                content: if wants_content { doc.content } else { None },
                score: doc.score as f32,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(query.k);
        Ok(hits)
    }

    fn count(&self, name: &str) -> Result<usize> {
        let resp = self
            .client
            .get(self.url(&format!("indexes/{name}/docs/$count")))
            .send()
            .map_err(send_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RagError::IndexNotFound(name.to_string()));
        }
        let body = check_status(resp)?
            .text()
            .map_err(|e| RagError::upstream(SERVICE, None, format!("unreadable count: {e}")))?;
        parse_count(&body)
    }

    fn backend_name(&self) -> &'static str {
        "search-service"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SearchServiceClient {
        SearchServiceClient::new(
            "https://search.example.net/",
            "admin-key",
            "2023-11-01",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_new_validates_inputs() {
        let timeout = Duration::from_secs(1);
        assert!(SearchServiceClient::new("search.example", "k", "v", timeout).is_err());
        assert!(SearchServiceClient::new("https://search.example", " ", "v", timeout).is_err());
    }

    #[test]
    fn test_url() {
        assert_eq!(
            client().url("indexes/docs/docs/search"),
            "https://search.example.net/indexes/docs/docs/search?api-version=2023-11-01"
        );
    }

    #[test]
    fn test_index_definition_shape() {
        let def = index_definition(&IndexSchema::new("docs", 384));
        assert_eq!(def["name"], "docs");
        assert_eq!(def["fields"][0]["key"], true);
        assert_eq!(def["fields"][1]["searchable"], true);
        assert_eq!(def["fields"][2]["dimensions"], 384);
        assert_eq!(def["vectorSearch"]["algorithms"][0]["kind"], "hnsw");
    }

    #[test]
    fn test_parse_index_definition() {
        let body = r#"{
            "name": "docs",
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true},
                {"name": "content", "type": "Edm.String"},
                {"name": "embedding", "type": "Collection(Edm.Single)", "dimensions": 384}
            ],
            "vectorSearch": {"algorithms": [{"name": "hnsw-config", "kind": "hnsw"}]}
        }"#;
        let def: IndexDefinition = serde_json::from_str(body).unwrap();
        let schema = def.into_schema().unwrap();
        assert_eq!(schema.dimension, 384);
        assert_eq!(schema.algorithm, SimilarityAlgorithm::Hnsw);
        assert!(schema.model_id.is_none());
    }

    #[test]
    fn test_parse_index_definition_without_vector_field() {
        let def: IndexDefinition =
            serde_json::from_str(r#"{"name": "docs", "fields": [{"name": "id"}]}"#).unwrap();
        assert!(def.into_schema().is_err());
    }

    #[test]
    fn test_upload_batch_serialization() {
        let records = vec![IndexRecord {
            key: "Li9kYXRh".to_string(),
            content: "alpha content".to_string(),
            embedding: vec![0.5, -0.25],
        }];
        let value = serde_json::to_value(UploadBatch::new(&records)).unwrap();
        let doc = &value["value"][0];
        assert_eq!(doc["@search.action"], "upload");
        assert_eq!(doc["id"], "Li9kYXRh");
        assert_eq!(doc["content"], "alpha content");
        assert_eq!(doc["embedding"], json!([0.5, -0.25]));
    }

    #[test]
    fn test_search_body_vector_only() {
        let body = search_body(&VectorQuery::new(vec![0.1, 0.2], 4));
        assert_eq!(body["search"], "");
        assert_eq!(body["top"], 4);
        assert_eq!(body["select"], "id,content");
        assert_eq!(body["vectorQueries"][0]["kind"], "vector");
        assert_eq!(body["vectorQueries"][0]["k"], 4);
        assert_eq!(body["vectorQueries"][0]["fields"], "embedding");
    }

    #[test]
    fn test_search_body_hybrid_key_only() {
        let query = VectorQuery::new(vec![0.1], 2)
            .select(&[SelectField::Key])
            .with_lexical("alpha");
        let body = search_body(&query);
        assert_eq!(body["search"], "alpha");
        assert_eq!(body["select"], "id");
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{"value": [
            {"@search.score": 0.82, "id": "b", "content": "beta"},
            {"@search.score": 0.91, "id": "a", "content": "alpha"}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.value.len(), 2);
        assert_eq!(parsed.value[1].id, "a");
        assert_eq!(parsed.value[0].content.as_deref(), Some("beta"));
    }

    #[test]
    fn test_parse_upload_response() {
        let body = r#"{"value": [
            {"key": "a", "status": true, "statusCode": 201},
            {"key": "b", "status": false, "errorMessage": "bad vector", "statusCode": 400}
        ]}"#;
        let parsed: UploadResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.value[0].status);
        assert_eq!(parsed.value[1].error_message.as_deref(), Some("bad vector"));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("\u{feff}42").unwrap(), 42);
        assert_eq!(parse_count(" 7\n").unwrap(), 7);
        assert!(parse_count("many").is_err());
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension_before_sending() {
        let client = client();
        client.remember_dimension("docs", Some(3));
        let records = vec![IndexRecord {
            key: "a".to_string(),
            content: String::new(),
            embedding: vec![1.0],
        }];
        // Fails locally; no request is made
        assert!(matches!(
            client.upsert("docs", &records),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    // ── Against a local service ─────────────────────────────────────

    use axum::extract::{Json, Path};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use serde_json::Value;

    fn upload_results(body: &Value, failing: Option<usize>) -> Value {
        let results: Vec<Value> = body["value"]
            .as_array()
            .map(|docs| {
                docs.iter()
                    .enumerate()
                    .map(|(i, doc)| {
                        let ok = failing != Some(i);
                        let (message, code) = if ok {
                            (Value::Null, 201)
                        } else {
                            (json!("vector too long"), 400)
                        };
                        json!({
                            "key": doc["id"],
                            "status": ok,
                            "errorMessage": message,
                            "statusCode": code,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        json!({ "value": results })
    }

    /// Index `docs` (3 dimensions) exists; `down` fails to create;
    /// `partial` answers uploads with 207; `rejects` refuses every document.
    fn search_service() -> SearchServiceClient {
        let definition = json!({
            "name": "docs",
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true},
                {"name": "content", "type": "Edm.String"},
                {"name": "embedding", "type": "Collection(Edm.Single)", "dimensions": 3}
            ],
            "vectorSearch": {"algorithms": [{"name": "hnsw-config", "kind": "hnsw"}]}
        });

        let app = axum::Router::new()
            .route(
                "/indexes/:name",
                get(move |Path(name): Path<String>, headers: HeaderMap| {
                    let definition = definition.clone();
                    async move {
                        if headers.get("api-key").and_then(|v| v.to_str().ok()) != Some("admin-key") {
                            return (HttpStatus::FORBIDDEN, Json(json!({})));
                        }
                        if name == "docs" {
                            (HttpStatus::OK, Json(definition))
                        } else {
                            (HttpStatus::NOT_FOUND, Json(json!({"error": {"message": "no index"}})))
                        }
                    }
                })
                .put(|Path(name): Path<String>| async move {
                    if name == "down" {
                        HttpStatus::SERVICE_UNAVAILABLE
                    } else {
                        HttpStatus::CREATED
                    }
                })
                .delete(|Path(name): Path<String>| async move {
                    if name == "docs" {
                        HttpStatus::NO_CONTENT
                    } else {
                        HttpStatus::NOT_FOUND
                    }
                }),
            )
            .route(
                "/indexes/:name/docs/index",
                post(|Path(name): Path<String>, Json(body): Json<Value>| async move {
                    match name.as_str() {
                        "partial" => (HttpStatus::MULTI_STATUS, Json(upload_results(&body, Some(1)))),
                        "rejects" => (HttpStatus::OK, Json(upload_results(&body, Some(0)))),
                        _ => (HttpStatus::OK, Json(upload_results(&body, None))),
                    }
                }),
            )
            .route(
                "/indexes/:name/docs/search",
                post(|Path(name): Path<String>| async move {
                    if name != "docs" {
                        return (HttpStatus::NOT_FOUND, Json(json!({})));
                    }
                    (
                        HttpStatus::OK,
                        Json(json!({"value": [
                            {"@search.score": 0.5, "id": "c", "content": "gamma"},
                            {"@search.score": 0.9, "id": "a", "content": "alpha"},
                            {"@search.score": 0.5, "id": "b", "content": "beta"}
                        ]})),
                    )
                }),
            )
            .route(
                "/indexes/:name/docs/$count",
                get(|| async { "\u{feff}3" }),
            );

        let base = crate::test_support::serve(app);
        SearchServiceClient::new(&base, "admin-key", "2023-11-01", Duration::from_secs(5)).unwrap()
    }

    fn records(n: usize, dims: usize) -> Vec<IndexRecord> {
        (0..n)
            .map(|i| IndexRecord {
                key: format!("k{i}"),
                content: format!("page {i}"),
                embedding: vec![0.5; dims],
            })
            .collect()
    }

    #[test]
    fn test_delete_reports_whether_index_existed() {
        let client = search_service();
        assert!(client.delete_if_exists("docs").unwrap());
        assert!(!client.delete_if_exists("missing").unwrap());
    }

    #[test]
    fn test_create_failure_is_upstream_error() {
        let client = search_service();
        client.create_index(&IndexSchema::new("fresh", 3)).unwrap();
        assert!(matches!(
            client.create_index(&IndexSchema::new("down", 3)),
            Err(RagError::Upstream { status: Some(503), .. })
        ));
    }

    #[test]
    fn test_describe_caches_dimension() {
        let client = search_service();
        assert!(client.describe("missing").unwrap().is_none());

        let schema = client.describe("docs").unwrap().unwrap();
        assert_eq!(schema.dimension, 3);
        assert_eq!(client.known_dimension("docs"), Some(3));

        // Rejected locally from the cached dimension
        assert!(matches!(
            client.upsert("docs", &records(1, 2)),
            Err(RagError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            client.query("docs", &VectorQuery::new(vec![1.0, 0.0], 2)),
            Err(RagError::DimensionMismatch { .. })
        ));
        client.upsert("docs", &records(2, 3)).unwrap();
    }

    #[test]
    fn test_rejected_documents_fail_the_batch() {
        let client = search_service();
        assert!(matches!(
            client.upsert("partial", &records(2, 3)),
            Err(RagError::Upstream { status: Some(207), .. })
        ));
        assert!(matches!(
            client.upsert("rejects", &records(2, 3)),
            Err(RagError::Upstream { .. })
        ));
    }

    #[test]
    fn test_query_orders_hits_and_maps_missing_index() {
        let client = search_service();
        let hits = client
            .query("docs", &VectorQuery::new(vec![1.0, 0.0, 0.0], 2))
            .unwrap();
        let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(hits[0].content.as_deref(), Some("alpha"));

        assert!(matches!(
            client.query("missing", &VectorQuery::new(vec![1.0, 0.0, 0.0], 2)),
            Err(RagError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_count_and_auth_header() {
        let client = search_service();
        assert_eq!(client.count("docs").unwrap(), 3);

        let base = client.endpoint.clone();
        let wrong_key =
            SearchServiceClient::new(&base, "other-key", "2023-11-01", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            wrong_key.describe("docs"),
            Err(RagError::Upstream { status: Some(403), .. })
        ));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
