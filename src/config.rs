//! Runtime configuration read from the environment.
//!
//! `main` loads `.env` first (via `dotenvy`), then calls [`Config::from_env`];
//! command-line flags overwrite individual fields afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::answerer::{AnswerPipeline, AnswerPipelineBuilder, DEFAULT_TOP_K, FailurePolicy};
use crate::ollama::{
    DEFAULT_EMBED_MODEL, DEFAULT_MODEL, OllamaClient, OllamaClientBuilder, OllamaError,
};
use crate::store::{Backend, QdrantStoreBuilder, SqliteStore, StoreError};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_COLLECTION: &str = "articles";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to determine data directory")]
    NoDataDirectory,
}

/// Which document store backs retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// Local SQLite database with full-text search.
    #[default]
    Sqlite,
    /// Qdrant vector index with Ollama embeddings.
    Qdrant,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(format!("unknown store {other:?}, expected sqlite or qdrant")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ollama_host: String,
    pub model: String,
    pub embed_model: String,
    pub store: StoreKind,
    pub db_path: PathBuf,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub top_k: usize,
    pub bind_addr: SocketAddr,
    pub rollback_on_failure: bool,
}

impl Config {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a variable that does not parse,
    /// and `ConfigError::NoDataDirectory` if `RAGCHAT_DB` is unset and no
    /// platform data directory exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads configuration through `lookup`, treating blank values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let db_path = match get("RAGCHAT_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };

        Ok(Self {
            ollama_host: get("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embed_model: get("OLLAMA_EMBED_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            store: parse_var("RAGCHAT_STORE", get("RAGCHAT_STORE"), StoreKind::default())?,
            db_path,
            qdrant_url: get("QDRANT_URL").unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string()),
            qdrant_api_key: get("QDRANT_API_KEY"),
            qdrant_collection: get("QDRANT_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            top_k: parse_top_k(get("RAGCHAT_TOP_K"))?,
            bind_addr: parse_var(
                "RAGCHAT_BIND_ADDR",
                get("RAGCHAT_BIND_ADDR"),
                SocketAddr::from(([127, 0, 0, 1], 8080)),
            )?,
            rollback_on_failure: parse_bool(
                "RAGCHAT_ROLLBACK_ON_FAILURE",
                get("RAGCHAT_ROLLBACK_ON_FAILURE"),
            )?,
        })
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.rollback_on_failure {
            FailurePolicy::RollBack
        } else {
            FailurePolicy::KeepDanglingTurn
        }
    }

    /// Builds an Ollama client from the configured host and models.
    pub fn ollama_client(&self) -> Result<OllamaClient, OllamaError> {
        OllamaClientBuilder::new()
            .base_url(&self.ollama_host)
            .model(&self.model)
            .embed_model(&self.embed_model)
            .build()
    }

    /// Opens the configured document store.
    ///
    /// The SQLite database file's parent directory must already exist.
    pub fn open_store(&self, client: Arc<OllamaClient>) -> Result<Backend, StoreError> {
        match self.store {
            StoreKind::Sqlite => Ok(Backend::Sqlite(Arc::new(SqliteStore::open(&self.db_path)?))),
            StoreKind::Qdrant => {
                let mut builder = QdrantStoreBuilder::new()
                    .url(&self.qdrant_url)
                    .collection(&self.qdrant_collection)
                    .embedder(client);
                if let Some(key) = &self.qdrant_api_key {
                    builder = builder.api_key(key);
                }
                Ok(Backend::Qdrant(Arc::new(builder.build()?)))
            }
        }
    }

    /// Assembles the answer pipeline over an opened store.
    pub fn pipeline(&self, client: Arc<OllamaClient>, store: &Backend) -> AnswerPipeline {
        AnswerPipelineBuilder::new(client, store.document_store())
            .top_k(self.top_k)
            .failure_policy(self.failure_policy())
            .build()
    }
}

/// `{data_dir}/ragchat/documents.db`, where `data_dir` is the platform data
/// directory (`~/.local/share` on Linux).
pub fn default_database_path() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDirectory)?;
    Ok(data_dir.join("ragchat").join("documents.db"))
}

fn parse_var<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn parse_top_k(value: Option<String>) -> Result<usize, ConfigError> {
    let top_k = parse_var("RAGCHAT_TOP_K", value, DEFAULT_TOP_K)?;
    if top_k == 0 {
        return Err(ConfigError::InvalidValue {
            var: "RAGCHAT_TOP_K",
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(top_k)
}

fn parse_bool(var: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}
