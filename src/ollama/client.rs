/// Ollama HTTP client implementation.
///
/// This module provides `OllamaClient` for making synchronous HTTP requests to the Ollama API,
/// along with the `TextGenerator` and `Embedder` capabilities the answer pipeline consumes.
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Default generation model when neither the builder nor `OLLAMA_MODEL` names one.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default embedding model when neither the builder nor `OLLAMA_EMBED_MODEL` names one.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Errors that can occur when interacting with the Ollama API.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Ollama API-specific errors
    #[error("Ollama API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl OllamaError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OllamaError::Timeout(err)
        } else {
            OllamaError::Network(err)
        }
    }
}

/// Single-shot text completion.
///
/// Implemented by `OllamaClient`; tests substitute scripted mocks.
pub trait TextGenerator: Send + Sync {
    /// Generates a completion for `prompt`. No streaming.
    fn generate(&self, prompt: &str) -> Result<String, OllamaError>;
}

/// Text embedding used to vectorise queries and documents for similarity search.
pub trait Embedder: Send + Sync {
    /// Returns the embedding vector for `text`.
    fn embed(&self, text: &str) -> Result<Vec<f32>, OllamaError>;
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use ragchat::ollama::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .model("llama3.2")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.model(), "llama3.2");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    embed_model: Option<String>,
    max_retries: Option<usize>,
}

impl OllamaClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for the Ollama API (e.g. "http://localhost:11434").
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model used for text generation.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the model used for embeddings.
    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = Some(model.into());
        self
    }

    /// Caps how many times a transient failure is retried (at most 3).
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries.min(BACKOFF_SECS.len()));
        self
    }

    /// Builds the `OllamaClient` with the configured settings.
    ///
    /// # Environment Variables
    ///
    /// Unset builder values fall back to `OLLAMA_HOST` (default
    /// `http://localhost:11434`), `OLLAMA_MODEL` (default [`DEFAULT_MODEL`]) and
    /// `OLLAMA_EMBED_MODEL` (default [`DEFAULT_EMBED_MODEL`]).
    ///
    /// # Errors
    ///
    /// Returns `OllamaError::InvalidUrl` if the base URL does not parse.
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let base_url = match self.base_url {
            Some(url) => url,
            None => std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
        };
        let base_url = base_url.trim_end_matches('/').to_string();

        let model = match self.model {
            Some(m) => m,
            None => std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        let embed_model = match self.embed_model {
            Some(m) => m,
            None => std::env::var("OLLAMA_EMBED_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
        };

        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            client,
            base_url,
            model,
            embed_model,
            max_retries: self.max_retries.unwrap_or(BACKOFF_SECS.len()),
        })
    }
}

/// Synchronous HTTP client for the Ollama API.
///
/// Stateless per call, so one instance is shared (behind `Arc`) by every
/// request in flight.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    embed_model: String,
    max_retries: usize,
}

impl OllamaClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the generation model configured for this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the embedding model configured for this client.
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Lists available models from the Ollama API, sorted by size (largest first).
    pub fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(OllamaError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(OllamaError::Http {
                status: response.status().as_u16(),
            });
        }

        let json: serde_json::Value = response.json().map_err(OllamaError::Network)?;

        let mut models: Vec<(String, u64)> = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| {
                        let name = model.get("name").and_then(|n| n.as_str())?;
                        let size = model.get("size").and_then(|s| s.as_u64()).unwrap_or(0);
                        Some((name.to_string(), size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        models.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(models.into_iter().map(|(name, _)| name).collect())
    }

    fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, OllamaError> {
        let url = format!("{}{}", self.base_url, path);

        retry_with_backoff(self.max_retries, || {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .map_err(OllamaError::from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                return Err(OllamaError::Http {
                    status: status.as_u16(),
                });
            }

            let text = response.text().map_err(OllamaError::from_reqwest)?;
            serde_json::from_str(&text).map_err(OllamaError::Serialization)
        })
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, OllamaError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0 }
        });

        let json = self.post_json("/api/generate", &request_body)?;
        parse_generate_response(&json)
    }
}

impl Embedder for OllamaClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>, OllamaError> {
        let request_body = serde_json::json!({
            "model": self.embed_model,
            "prompt": text
        });

        let json = self.post_json("/api/embeddings", &request_body)?;
        parse_embedding_response(&json)
    }
}

/// Extracts the `response` field of an `/api/generate` reply.
fn parse_generate_response(json: &serde_json::Value) -> Result<String, OllamaError> {
    json.get("response")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| OllamaError::Api {
            message: "Missing 'response' field in API response".to_string(),
        })
}

/// Extracts the `embedding` array of an `/api/embeddings` reply.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, OllamaError> {
    let values = json
        .get("embedding")
        .and_then(|v| v.as_array())
        .ok_or_else(|| OllamaError::Api {
            message: "Missing 'embedding' field in API response".to_string(),
        })?;

    if values.is_empty() {
        return Err(OllamaError::Api {
            message: "Embedding model returned an empty vector".to_string(),
        });
    }

    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| OllamaError::Api {
                message: "Embedding contains a non-numeric value".to_string(),
            })
        })
        .collect()
}

const BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// Retries an operation with exponential backoff (1s, 2s, 4s).
///
/// Only transient errors (network, timeouts, HTTP 5xx) are retried, and at most
/// `max_retries` times.
pub fn retry_with_backoff<F, T>(max_retries: usize, mut f: F) -> Result<T, OllamaError>
where
    F: FnMut() -> Result<T, OllamaError>,
{
    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) if !should_retry(&e) => return Err(e),
        Err(e) => e,
    };

    for (attempt, &delay_secs) in BACKOFF_SECS.iter().take(max_retries).enumerate() {
        warn!(attempt = attempt + 1, delay_secs, error = %last_error, "retrying ollama request");
        thread::sleep(Duration::from_secs(delay_secs));

        match f() {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => last_error = e,
        }
    }

    debug!("ollama retries exhausted");
    Err(last_error)
}

/// Returns `true` for transient errors (HTTP 5xx, network errors, timeouts).
fn should_retry(error: &OllamaError) -> bool {
    match error {
        OllamaError::Network(_) | OllamaError::Timeout(_) => true,
        OllamaError::Http { status } => (500..600).contains(status),
        OllamaError::Serialization(_) | OllamaError::Api { .. } | OllamaError::InvalidUrl(_) => {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn network_error() -> OllamaError {
        OllamaError::Network(
            reqwest::blocking::Client::new()
                .get("not-a-valid-url")
                .build()
                .unwrap_err(),
        )
    }

    #[test]
    fn http_error_variant_with_status_code() {
        let error_msg = format!("{}", OllamaError::Http { status: 404 });
        assert!(error_msg.contains("HTTP error"));
        assert!(error_msg.contains("404"));
    }

    #[test]
    fn serialization_error_variant_wraps_serde_errors() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let ollama_error = OllamaError::Serialization(json_error);

        assert!(ollama_error.to_string().contains("Serialization error"));
        assert!(ollama_error.source().is_some());
    }

    #[test]
    #[serial]
    fn build_uses_defaults_when_env_unset() {
        unsafe {
            std::env::remove_var("OLLAMA_HOST");
            std::env::remove_var("OLLAMA_MODEL");
            std::env::remove_var("OLLAMA_EMBED_MODEL");
        }

        let client = OllamaClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.embed_model(), DEFAULT_EMBED_MODEL);
    }

    #[test]
    #[serial]
    fn build_reads_environment_variables() {
        unsafe {
            std::env::set_var("OLLAMA_HOST", "http://custom-host:11434/");
            std::env::set_var("OLLAMA_MODEL", "gemma3:4b");
        }

        let client = OllamaClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url(), "http://custom-host:11434");
        assert_eq!(client.model(), "gemma3:4b");

        unsafe {
            std::env::remove_var("OLLAMA_HOST");
            std::env::remove_var("OLLAMA_MODEL");
        }
    }

    #[test]
    #[serial]
    fn builder_values_take_precedence_over_env() {
        unsafe {
            std::env::set_var("OLLAMA_MODEL", "env-model");
        }

        let client = OllamaClientBuilder::new()
            .model("builder-model")
            .build()
            .unwrap();
        assert_eq!(client.model(), "builder-model");

        unsafe {
            std::env::remove_var("OLLAMA_MODEL");
        }
    }

    #[test]
    fn build_returns_error_if_invalid_url_provided() {
        let result = OllamaClientBuilder::new()
            .base_url("not-a-valid-url")
            .build();
        assert!(matches!(result, Err(OllamaError::InvalidUrl(_))));
    }

    #[test]
    fn parse_generate_response_extracts_text() {
        let json = serde_json::json!({ "response": "Generated text here" });
        assert_eq!(parse_generate_response(&json).unwrap(), "Generated text here");

        let missing = serde_json::json!({ "done": true });
        assert!(matches!(
            parse_generate_response(&missing),
            Err(OllamaError::Api { .. })
        ));
    }

    #[test]
    fn parse_embedding_response_reads_floats() {
        let json = serde_json::json!({ "embedding": [0.5, -1.0, 2.25] });
        assert_eq!(parse_embedding_response(&json).unwrap(), vec![0.5, -1.0, 2.25]);
    }

    #[test]
    fn parse_embedding_response_rejects_empty_and_malformed() {
        let empty = serde_json::json!({ "embedding": [] });
        assert!(parse_embedding_response(&empty).is_err());

        let malformed = serde_json::json!({ "embedding": [0.1, "x"] });
        assert!(parse_embedding_response(&malformed).is_err());
    }

    #[test]
    fn retry_succeeds_after_transient_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<&str, OllamaError> = retry_with_backoff(3, move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                Err(OllamaError::Http { status: 503 })
            } else {
                Ok("success")
            }
        });

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_does_not_occur_on_client_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<&str, OllamaError> = retry_with_backoff(3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(OllamaError::Http { status: 404 })
        });

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_retries_makes_a_single_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<&str, OllamaError> = retry_with_backoff(0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(network_error())
        });

        assert!(matches!(result, Err(OllamaError::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn trait_objects_can_be_shared() {
        struct Echo;

        impl TextGenerator for Echo {
            fn generate(&self, prompt: &str) -> Result<String, OllamaError> {
                Ok(prompt.to_uppercase())
            }
        }

        let generator: Arc<dyn TextGenerator> = Arc::new(Echo);
        assert_eq!(generator.generate("hi").unwrap(), "HI");
    }
}
