//! Qdrant-backed document store, spoken to over its REST API.
//!
//! Points carry the payload layout `{content, metadata: {id, url}}`, so
//! collections built by other indexers with the same layout can be searched
//! as-is.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info};

use super::{DocumentStore, RetrievedDocument, StoreError};
use crate::dataset::Article;
use crate::ollama::Embedder;

/// Distance metric used when this crate creates a collection.
pub const DEFAULT_DISTANCE: &str = "Manhattan";

/// Builder for [`QdrantStore`].
///
/// Unset values fall back to `QDRANT_URL` (default `http://localhost:6333`),
/// `QDRANT_API_KEY` (default none) and `QDRANT_COLLECTION` (default `articles`).
#[derive(Default)]
pub struct QdrantStoreBuilder {
    url: Option<String>,
    api_key: Option<String>,
    collection: Option<String>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl QdrantStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Sets the embedder used to vectorise queries and articles.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Builds the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if no embedder was set, the URL does not
    /// parse, or the collection name is blank.
    pub fn build(self) -> Result<QdrantStore, StoreError> {
        let embedder = self
            .embedder
            .ok_or_else(|| StoreError::Config("an embedder is required".to_string()))?;

        let url = match self.url {
            Some(url) => url,
            None => std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6333".to_string()),
        };
        let url = url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&url)
            .map_err(|e| StoreError::Config(format!("invalid Qdrant URL {url}: {e}")))?;

        let api_key = self
            .api_key
            .or_else(|| std::env::var("QDRANT_API_KEY").ok())
            .filter(|k| !k.is_empty());

        let collection = match self.collection {
            Some(name) => name,
            None => std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "articles".to_string()),
        };
        if collection.trim().is_empty() {
            return Err(StoreError::Config("collection name is empty".to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(StoreError::Network)?;

        Ok(QdrantStore {
            client,
            url,
            api_key,
            collection,
            embedder,
        })
    }
}

/// Similarity search over a Qdrant collection.
pub struct QdrantStore {
    client: reqwest::blocking::Client,
    url: String,
    api_key: Option<String>,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl QdrantStore {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates the collection with `dimensions`-sized vectors if it is missing.
    ///
    /// Returns `true` when the collection was created.
    pub fn ensure_collection(&self, dimensions: usize) -> Result<bool, StoreError> {
        let path = format!("/collections/{}", self.collection);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(StoreError::Network)?;

        if response.status().is_success() {
            return Ok(false);
        }
        if response.status().as_u16() != 404 {
            return Err(http_error(response));
        }

        let body = json!({
            "vectors": { "size": dimensions, "distance": DEFAULT_DISTANCE }
        });
        self.send_json(reqwest::Method::PUT, &path, &body)?;
        info!(collection = %self.collection, dimensions, "created qdrant collection");
        Ok(true)
    }

    /// Embeds and upserts articles, creating the collection on first use.
    pub fn add_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut points = Vec::with_capacity(articles.len());
        for article in articles {
            let vector = self
                .embedder
                .embed(&article.content)
                .map_err(StoreError::Embedding)?;
            points.push(point_for(article, vector));
        }

        let dimensions = points[0]["vector"].as_array().map_or(0, Vec::len);
        self.ensure_collection(dimensions)?;

        let path = format!("/collections/{}/points?wait=true", self.collection);
        self.send_json(reqwest::Method::PUT, &path, &json!({ "points": points }))?;
        debug!(count = articles.len(), collection = %self.collection, "upserted points");
        Ok(articles.len())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::blocking::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn send_json(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .request(method, path)
            .json(body)
            .send()
            .map_err(StoreError::Network)?;

        if !response.status().is_success() {
            return Err(http_error(response));
        }

        let text = response.text().map_err(StoreError::Network)?;
        serde_json::from_str(&text).map_err(|e| StoreError::Malformed {
            message: e.to_string(),
        })
    }
}

impl DocumentStore for QdrantStore {
    fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).map_err(StoreError::Embedding)?;
        let path = format!("/collections/{}/points/search", self.collection);
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true
        });

        let response = self.send_json(reqwest::Method::POST, &path, &body)?;
        let mut docs = parse_search_response(&response)?;
        docs.truncate(k);
        Ok(docs)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let path = format!("/collections/{}/points/count", self.collection);
        let response = self.send_json(reqwest::Method::POST, &path, &json!({ "exact": true }))?;

        response
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Malformed {
                message: "count response has no result.count".to_string(),
            })
    }
}

fn http_error(response: reqwest::blocking::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    StoreError::Http { status, body }
}

/// Builds the upsert payload for one article.
fn point_for(article: &Article, vector: Vec<f32>) -> Value {
    json!({
        "id": point_id(&article.id),
        "vector": vector,
        "payload": {
            "content": article.content,
            "metadata": { "id": article.id, "url": article.link }
        }
    })
}

/// Stable numeric point id derived from the article id (64-bit FNV-1a).
///
/// Re-ingesting an article overwrites its point instead of duplicating it.
fn point_id(article_id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    article_id
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Reads `result[].payload` into documents, preserving rank order.
fn parse_search_response(response: &Value) -> Result<Vec<RetrievedDocument>, StoreError> {
    let hits = response
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Malformed {
            message: "search response has no result array".to_string(),
        })?;

    hits.iter()
        .map(|hit| {
            let payload = hit.get("payload").ok_or_else(|| StoreError::Malformed {
                message: "search hit has no payload".to_string(),
            })?;
            let body = payload
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::Malformed {
                    message: "payload has no content".to_string(),
                })?;
            let url = payload
                .pointer("/metadata/url")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(RetrievedDocument::new(body, url))
        })
        .collect()
}
