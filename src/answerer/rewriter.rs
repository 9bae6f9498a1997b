//! Turns a follow-up question into a standalone one.

use std::sync::Arc;

use super::prompt::render;
use crate::ollama::{OllamaError, TextGenerator};

/// Prompt asking the model to correct and shorten the question given the history.
const PROMPT_TEMPLATE: &str = "Given some conversation history (if any) and a question, reformulate, correct and shorten the question if necessary.
Conversation history: {chat_history}
Question: {question}
Corrected question: ";

/// Rewrites questions with one text-generation call each.
pub struct QuestionRewriter {
    client: Arc<dyn TextGenerator>,
}

impl QuestionRewriter {
    pub fn new(client: Arc<dyn TextGenerator>) -> Self {
        Self { client }
    }

    /// Returns the model's standalone version of `question`, unvalidated.
    pub fn rewrite(&self, question: &str, chat_history: &str) -> Result<String, OllamaError> {
        self.client.generate(&build_prompt(question, chat_history))
    }
}

fn build_prompt(question: &str, chat_history: &str) -> String {
    render(
        PROMPT_TEMPLATE,
        &[("chat_history", chat_history), ("question", question)],
    )
}
