//! Similarity search over the reference document index.
//!
//! The answer pipeline only sees the [`DocumentStore`] trait. Two backends are
//! provided: a local SQLite FTS5 index and a Qdrant collection searched by
//! embedding.

mod qdrant;
mod schema;
mod sqlite;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Article;
use crate::ollama::OllamaError;

pub use qdrant::{QdrantStore, QdrantStoreBuilder};
pub use sqlite::SqliteStore;

/// A document returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    body: String,
    source_url: String,
}

impl RetrievedDocument {
    pub fn new(body: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            source_url: source_url.into(),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[source] OllamaError),

    #[error("vector index request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("vector index returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed vector index response: {message}")]
    Malformed { message: String },

    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Black-box similarity search.
///
/// Implementations are long-lived handles shared across concurrent requests.
pub trait DocumentStore: Send + Sync {
    /// Returns up to `k` documents ranked most-similar first.
    fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StoreError>;

    /// Number of indexed documents, used by health checks.
    fn count(&self) -> Result<u64, StoreError>;
}

/// An opened store of either kind, keeping the concrete type for ingestion.
#[derive(Clone)]
pub enum Backend {
    Sqlite(Arc<SqliteStore>),
    Qdrant(Arc<QdrantStore>),
}

impl Backend {
    /// The store as the pipeline sees it.
    pub fn document_store(&self) -> Arc<dyn DocumentStore> {
        match self {
            Self::Sqlite(store) => Arc::clone(store) as Arc<dyn DocumentStore>,
            Self::Qdrant(store) => Arc::clone(store) as Arc<dyn DocumentStore>,
        }
    }

    pub fn add_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
        match self {
            Self::Sqlite(store) => store.add_articles(articles),
            Self::Qdrant(store) => store.add_articles(articles),
        }
    }
}
