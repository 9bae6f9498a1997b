pub mod answerer;
pub mod config;
pub mod conversation;
pub mod dataset;
pub mod doctor;
pub mod ollama;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;

pub use answerer::{AnswerError, AnswerPipeline, AnswerPipelineBuilder, AnswerResult, FailurePolicy};
pub use config::{Config, ConfigError, StoreKind};
pub use conversation::{ConversationHistory, Role, Turn};
pub use dataset::{Article, DatasetError};
pub use ollama::{Embedder, OllamaClient, OllamaClientBuilder, OllamaError, TextGenerator};
pub use session::{SessionId, SessionStore};
pub use store::{Backend, DocumentStore, QdrantStore, RetrievedDocument, SqliteStore, StoreError};
