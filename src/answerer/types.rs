//! Types shared by the answer pipeline stages.

use std::fmt;

use serde::Serialize;

/// Reply the model is told to give when the context does not contain the answer.
pub const SORRY_NO_ANSWER: &str = "I'm sorry, I don't know the answer to that.";

/// Message shown to callers when a request fails for any non-input reason.
pub const INVOCATION_FAILED: &str = "Model invocation failed.";

/// Message shown to callers when the question is missing or blank.
pub const MESSAGE_REQUIRED: &str = "Message is required";

/// Progress of a single request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Rewriting,
    Retrieving,
    Answering,
    Completed,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Rewriting => "rewriting",
            Self::Retrieving => "retrieving",
            Self::Answering => "answering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retrieval output: the prompt context plus the citation fragment for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    /// Document bodies joined by newlines
    pub context: String,
    /// `<br>Learn more:<br>` followed by one anchor per document, or empty
    pub citation_html: String,
    /// Trimmed source URLs, in retrieval order
    pub links: Vec<String>,
}

/// Final answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerResult {
    answer_text: String,
    citation_html: String,
    links: Vec<String>,
}

impl AnswerResult {
    /// Combines an answer with its citations.
    ///
    /// Citations are dropped when the answer is the "don't know" sentinel.
    pub fn new(answer_text: String, citations: AssembledContext) -> Self {
        if is_sorry_answer(&answer_text) {
            return Self {
                answer_text,
                citation_html: String::new(),
                links: Vec::new(),
            };
        }

        Self {
            answer_text,
            citation_html: citations.citation_html,
            links: citations.links,
        }
    }

    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    pub fn citation_html(&self) -> &str {
        &self.citation_html
    }

    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// True when the model gave the "don't know" sentinel.
    pub fn is_sorry_answer(&self) -> bool {
        is_sorry_answer(&self.answer_text)
    }
}

/// Exact comparison against [`SORRY_NO_ANSWER`].
pub fn is_sorry_answer(answer: &str) -> bool {
    answer == SORRY_NO_ANSWER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citations() -> AssembledContext {
        AssembledContext {
            context: "ctx".to_string(),
            citation_html: "<br>Learn more:<br><a href='u1'>🔗 Article #1</a>".to_string(),
            links: vec!["u1".to_string()],
        }
    }

    #[test]
    fn answer_keeps_citations() {
        let result = AnswerResult::new("X is Y.".to_string(), citations());
        assert_eq!(result.answer_text(), "X is Y.");
        assert!(!result.citation_html().is_empty());
        assert_eq!(result.links(), ["u1".to_string()]);
    }

    #[test]
    fn sorry_answer_drops_citations() {
        let result = AnswerResult::new(SORRY_NO_ANSWER.to_string(), citations());
        assert!(result.is_sorry_answer());
        assert_eq!(result.citation_html(), "");
        assert!(result.links().is_empty());
    }

    #[test]
    fn sentinel_match_is_exact() {
        assert!(!is_sorry_answer("I'm sorry, I don't know the answer to that"));
        assert!(!is_sorry_answer(" I'm sorry, I don't know the answer to that."));
    }

    #[test]
    fn stage_display() {
        assert_eq!(PipelineStage::Retrieving.to_string(), "retrieving");
        assert_eq!(PipelineStage::Failed.to_string(), "failed");
    }
}
