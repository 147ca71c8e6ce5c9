use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, warn};

use crate::{error::AppError, utils::config::AppConfig, utils::config::VectorIndexKind};

const PROVIDER: &str = "qdrant";

/// Payload stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub workspace_id: String,
    pub chunk_index: u32,
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPoint {
    /// Same id as the persisted chunk.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Option<ChunkPayload>,
}

/// Deterministic per-workspace collection name.
pub fn collection_name(workspace_id: &str) -> String {
    format!("workspace_{workspace_id}")
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool, AppError>;

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), AppError>;

    /// Insert or replace points by id.
    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>)
        -> Result<(), AppError>;

    /// Nearest neighbours by cosine similarity, best first. A missing collection has no hits.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, AppError>;

    async fn delete_by_document(&self, collection: &str, document_id: &str)
        -> Result<(), AppError>;

    /// Ids of the points stored for one document. A missing collection has none.
    async fn document_point_ids(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError>;
}

pub type DynVectorIndex = Arc<dyn VectorIndex>;

/// Builds the configured index backend.
pub fn from_config(config: &AppConfig) -> Result<DynVectorIndex, AppError> {
    match config.vector_index {
        VectorIndexKind::Qdrant => Ok(Arc::new(QdrantIndex::new(
            &config.qdrant_url,
            config.qdrant_api_key.as_deref(),
            Duration::from_secs(config.request_timeout_secs),
        )?)),
        VectorIndexKind::Memory => Ok(Arc::new(MemoryVectorIndex::default())),
    }
}

/// Creates the collection when it does not exist yet.
pub async fn ensure_collection(
    index: &dyn VectorIndex,
    collection: &str,
    dimension: usize,
) -> Result<(), AppError> {
    if index.collection_exists(collection).await? {
        return Ok(());
    }
    info!(collection = %collection, dimension, "Creating vector collection");
    index.create_collection(collection, dimension).await
}

/// Upserts with exponential backoff. Point ids are stable, so retries are idempotent.
pub async fn upsert_with_retry(
    index: &dyn VectorIndex,
    collection: &str,
    points: Vec<VectorPoint>,
) -> Result<(), AppError> {
    if points.is_empty() {
        return Ok(());
    }
    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
    Retry::spawn(retry_strategy, || {
        let batch = points.clone();
        async move {
            index.upsert_points(collection, batch).await.map_err(|err| {
                warn!(collection = %collection, error = %err, "Vector upsert attempt failed");
                err
            })
        }
    })
    .await
}

/// Qdrant REST client.
#[derive(Clone)]
pub struct QdrantIndex {
    http: Client,
    base_url: String,
}

impl QdrantIndex {
    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = key
                .parse()
                .map_err(|_| AppError::Validation("invalid qdrant api key".into()))?;
            headers.insert("api-key", value);
        }
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn expect_success(response: reqwest::Response, action: &str) -> Result<(), AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(provider = PROVIDER, status = status.as_u16(), action, "Vector index call failed");
        Err(AppError::upstream(
            PROVIDER,
            Some(status.as_u16()),
            format!("{action} failed: {body}"),
        ))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchEntry>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollPage,
}

#[derive(Deserialize)]
struct ScrollPage {
    points: Vec<ScrollEntry>,
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ScrollEntry {
    id: serde_json::Value,
}

fn point_id(id: serde_json::Value) -> String {
    match id {
        serde_json::Value::String(id) => id,
        other => other.to_string(),
    }
}

const SCROLL_PAGE_SIZE: usize = 256;

#[derive(Deserialize)]
struct SearchEntry {
    id: serde_json::Value,
    score: f32,
    payload: Option<serde_json::Value>,
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_exists(&self, collection: &str) -> Result<bool, AppError> {
        let response = self
            .http
            .get(self.url(&format!("collections/{collection}")))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::expect_success(response, "collection lookup")
                .await
                .map(|()| false),
        }
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), AppError> {
        let response = self
            .http
            .put(self.url(&format!("collections/{collection}")))
            .json(&json!({ "vectors": { "size": dimension, "distance": "Cosine" } }))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Self::expect_success(response, "collection creation").await
    }

    async fn upsert_points(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), AppError> {
        let count = points.len();
        let response = self
            .http
            .put(self.url(&format!("collections/{collection}/points")))
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::expect_success(response, "point upsert").await?;
        debug!(collection = %collection, count, "Upserted points");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let response = self
            .http
            .post(self.url(&format!("collections/{collection}/points/search")))
            .json(&json!({ "vector": vector, "limit": limit, "with_payload": true }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(collection = %collection, "Collection missing, no hits");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Self::expect_success(response, "search").await.map(|()| Vec::new());
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .result
            .into_iter()
            .map(|entry| ScoredPoint {
                id: point_id(entry.id),
                score: entry.score,
                payload: entry
                    .payload
                    .and_then(|payload| serde_json::from_value(payload).ok()),
            })
            .collect())
    }

    async fn delete_by_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .post(self.url(&format!("collections/{collection}/points/delete")))
            .query(&[("wait", "true")])
            .json(&json!({
                "filter": {
                    "must": [{ "key": "document_id", "match": { "value": document_id } }]
                }
            }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(response, "point deletion").await
    }

    async fn document_point_ids(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::new();
        let mut offset: Option<serde_json::Value> = None;
        loop {
            let mut body = json!({
                "filter": {
                    "must": [{ "key": "document_id", "match": { "value": document_id } }]
                },
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(next) = offset.take() {
                body["offset"] = next;
            }

            let response = self
                .http
                .post(self.url(&format!("collections/{collection}/points/scroll")))
                .json(&body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Self::expect_success(response, "point scroll")
                    .await
                    .map(|()| Vec::new());
            }

            let page: ScrollResponse = response.json().await?;
            ids.extend(page.result.points.into_iter().map(|entry| point_id(entry.id)));
            match page.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(ids)
    }
}

struct MemoryCollection {
    dimension: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-process cosine index with fixed-dimension collections.
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryVectorIndex {
    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    pub async fn point_ids(&self, collection: &str) -> Vec<String> {
        let guard = self.collections.read().await;
        let mut ids: Vec<String> = guard
            .get(collection)
            .map(|c| c.points.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn collection_exists(&self, collection: &str) -> Result<bool, AppError> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), AppError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                dimension,
                points: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert_points(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), AppError> {
        let mut guard = self.collections.write().await;
        let target = guard
            .get_mut(collection)
            .ok_or_else(|| AppError::NotFound(format!("collection {collection} not found")))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(AppError::DataIntegrity(format!(
                "vector dimension mismatch for point {}: got {}, expected {}",
                bad.id,
                bad.vector.len(),
                target.dimension
            )));
        }
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let guard = self.collections.read().await;
        let Some(target) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        if vector.len() != target.dimension {
            return Err(AppError::DataIntegrity(format!(
                "query vector dimension mismatch for {collection}: got {}, expected {}",
                vector.len(),
                target.dimension
            )));
        }

        let mut scored: Vec<ScoredPoint> = target
            .points
            .values()
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.vector),
                payload: Some(point.payload.clone()),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_by_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        if let Some(target) = self.collections.write().await.get_mut(collection) {
            target
                .points
                .retain(|_, point| point.payload.document_id != document_id);
        }
        Ok(())
    }

    async fn document_point_ids(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let guard = self.collections.read().await;
        let mut ids: Vec<String> = guard
            .get(collection)
            .map(|target| {
                target
                    .points
                    .values()
                    .filter(|point| point.payload.document_id == document_id)
                    .map(|point| point.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, document_id: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            payload: ChunkPayload {
                document_id: document_id.to_string(),
                workspace_id: "ws".to_string(),
                chunk_index: 0,
                page_number: 1,
                text: format!("text of {id}"),
            },
        }
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("abc"), "workspace_abc");
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_empty() {
        let index = MemoryVectorIndex::default();
        let hits = index.search("workspace_none", &[1.0, 0.0], 5).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_collection_and_ranked_search() {
        let index = MemoryVectorIndex::default();
        ensure_collection(&index, "c", 2).await.expect("ensure");
        ensure_collection(&index, "c", 2).await.expect("ensure twice");

        upsert_with_retry(
            &index,
            "c",
            vec![
                point("a", "doc-1", vec![1.0, 0.0]),
                point("b", "doc-1", vec![0.7, 0.7]),
                point("c", "doc-2", vec![0.0, 1.0]),
            ],
        )
        .await
        .expect("upsert");

        let hits = index.search("c", &[1.0, 0.1], 2).await.expect("search");
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(
            hits[0].payload.as_ref().map(|p| p.text.as_str()),
            Some("text of a")
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id_and_checks_dimension() {
        let index = MemoryVectorIndex::default();
        index.create_collection("c", 2).await.expect("create");
        index
            .upsert_points("c", vec![point("a", "doc-1", vec![1.0, 0.0])])
            .await
            .expect("upsert");
        index
            .upsert_points("c", vec![point("a", "doc-1", vec![0.0, 1.0])])
            .await
            .expect("re-upsert");
        assert_eq!(index.point_count("c").await, 1);

        let wrong = index
            .upsert_points("c", vec![point("b", "doc-1", vec![1.0, 0.0, 0.0])])
            .await;
        assert!(matches!(wrong, Err(AppError::DataIntegrity(_))));

        let wrong_query = index.search("c", &[1.0, 0.0, 0.0], 5).await;
        assert!(matches!(wrong_query, Err(AppError::DataIntegrity(_))));
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let index = MemoryVectorIndex::default();
        index.create_collection("c", 2).await.expect("create");
        index
            .upsert_points(
                "c",
                vec![
                    point("a", "doc-1", vec![1.0, 0.0]),
                    point("b", "doc-2", vec![0.0, 1.0]),
                ],
            )
            .await
            .expect("upsert");

        assert_eq!(
            index.document_point_ids("c", "doc-1").await.expect("ids"),
            vec!["a".to_string()]
        );

        index.delete_by_document("c", "doc-1").await.expect("delete");
        assert_eq!(index.point_ids("c").await, vec!["b".to_string()]);
        assert!(index
            .document_point_ids("c", "doc-1")
            .await
            .expect("ids")
            .is_empty());
        assert!(index
            .document_point_ids("missing", "doc-1")
            .await
            .expect("ids on missing collection")
            .is_empty());

        // unknown collections are ignored
        index
            .delete_by_document("missing", "doc-1")
            .await
            .expect("delete on missing collection");
    }
}
