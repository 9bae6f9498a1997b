//! Failure taxonomy of the answer pipeline.

use thiserror::Error;

use super::types::{INVOCATION_FAILED, MESSAGE_REQUIRED, PipelineStage};
use crate::ollama::OllamaError;
use crate::store::StoreError;

/// Error from one of the external capabilities the pipeline calls.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Generation(#[from] OllamaError),

    #[error(transparent)]
    Retrieval(#[from] StoreError),
}

/// Why a question could not be answered.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Question was missing or blank; nothing was called.
    #[error("question cannot be empty")]
    InvalidInput,

    /// Text generation or similarity search failed.
    #[error("upstream failure while {stage}: {source}")]
    UpstreamFailure {
        stage: PipelineStage,
        #[source]
        source: UpstreamError,
    },

    /// The answer generation call succeeded but produced no text.
    #[error("model returned an empty answer")]
    EmptyResult,
}

impl AnswerError {
    pub(crate) fn upstream(stage: PipelineStage, source: impl Into<UpstreamError>) -> Self {
        Self::UpstreamFailure {
            stage,
            source: source.into(),
        }
    }

    /// True when the caller can fix the request by resubmitting.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput)
    }

    /// Stage the request was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::InvalidInput => PipelineStage::Received,
            Self::UpstreamFailure { stage, .. } => *stage,
            Self::EmptyResult => PipelineStage::Answering,
        }
    }

    /// The generic message shown to end users.
    ///
    /// Everything except invalid input collapses to one invocation-failure text.
    pub fn user_message(&self) -> &'static str {
        if self.is_client_error() {
            MESSAGE_REQUIRED
        } else {
            INVOCATION_FAILED
        }
    }
}
