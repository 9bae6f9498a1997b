//! Conversational question answering over retrieved articles.
//!
//! A question goes through three stages: the [`QuestionRewriter`] makes it
//! standalone using the conversation history, the [`ContextAssembler`] retrieves
//! similar articles for the rewritten question, and the [`AnswerGenerator`]
//! answers the original question from that context. [`AnswerPipeline`] runs the
//! stages in order and keeps the history consistent.

mod context;
mod error;
mod generator;
mod pipeline;
mod prompt;
mod rewriter;
mod types;

pub use context::{ContextAssembler, DEFAULT_TOP_K, assemble_documents, render_citations};
pub use error::{AnswerError, UpstreamError};
pub use generator::AnswerGenerator;
pub use pipeline::{AnswerPipeline, AnswerPipelineBuilder, FailurePolicy};
pub use rewriter::QuestionRewriter;
pub use types::{
    AnswerResult, AssembledContext, INVOCATION_FAILED, MESSAGE_REQUIRED, PipelineStage,
    SORRY_NO_ANSWER, is_sorry_answer,
};
