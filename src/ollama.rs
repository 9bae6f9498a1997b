/// Ollama HTTP client module.
///
/// This module provides a blocking HTTP client for the Ollama API, covering
/// text generation and embeddings, with error handling, retry logic, and
/// timeout configuration.
mod client;

pub use client::{
    DEFAULT_EMBED_MODEL, DEFAULT_MODEL, Embedder, OllamaClient, OllamaClientBuilder, OllamaError,
    TextGenerator, retry_with_backoff,
};
