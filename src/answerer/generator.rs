//! Grounded answer generation.

use std::sync::Arc;

use super::prompt::render;
use super::types::SORRY_NO_ANSWER;
use crate::ollama::{OllamaError, TextGenerator};

/// Prompt constraining the model to the retrieved context.
const PROMPT_TEMPLATE: &str = "You are an assistant for question-answering tasks.
Use the following pieces of retrieved context to answer the question as well as the conversation history.
If you don't know the answer, just say {sorry}. Don't try to make up an answer.
Be friendly, use three sentences maximum and keep the answer concise.
Context: {context}
Question: {question}
Conversation history: {chat_history}";

/// Produces the final answer with one text-generation call.
pub struct AnswerGenerator {
    client: Arc<dyn TextGenerator>,
}

impl AnswerGenerator {
    pub fn new(client: Arc<dyn TextGenerator>) -> Self {
        Self { client }
    }

    /// Returns the model's raw answer.
    ///
    /// Whether the model actually used the sentinel when it should have is not
    /// checked here.
    pub fn generate(
        &self,
        context: &str,
        question: &str,
        chat_history: &str,
    ) -> Result<String, OllamaError> {
        self.client
            .generate(&build_prompt(context, question, chat_history))
    }
}

fn build_prompt(context: &str, question: &str, chat_history: &str) -> String {
    render(
        PROMPT_TEMPLATE,
        &[
            ("sorry", SORRY_NO_ANSWER),
            ("context", context),
            ("question", question),
            ("chat_history", chat_history),
        ],
    )
}
