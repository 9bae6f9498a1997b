//! Orchestration of rewrite → retrieve → answer for one question.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use super::context::{ContextAssembler, DEFAULT_TOP_K};
use super::error::AnswerError;
use super::generator::AnswerGenerator;
use super::rewriter::QuestionRewriter;
use super::types::{AnswerResult, PipelineStage};
use crate::conversation::{ConversationHistory, Turn};
use crate::ollama::TextGenerator;
use crate::session::{SessionId, SessionStore};
use crate::store::DocumentStore;

/// What happens to the question's human turn when the request fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave the unanswered human turn in the history.
    #[default]
    KeepDanglingTurn,
    /// Restore the history to its length before the request.
    RollBack,
}

/// Builder for [`AnswerPipeline`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ragchat::answerer::{AnswerPipelineBuilder, FailurePolicy};
/// use ragchat::ollama::{OllamaError, TextGenerator};
/// use ragchat::store::SqliteStore;
///
/// struct Canned;
///
/// impl TextGenerator for Canned {
///     fn generate(&self, _prompt: &str) -> Result<String, OllamaError> {
///         Ok("canned".to_string())
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = AnswerPipelineBuilder::new(Arc::new(Canned), Arc::new(SqliteStore::in_memory()?))
///     .top_k(5)
///     .failure_policy(FailurePolicy::RollBack)
///     .build();
/// assert_eq!(pipeline.top_k(), 5);
/// # Ok(())
/// # }
/// ```
pub struct AnswerPipelineBuilder {
    client: Arc<dyn TextGenerator>,
    store: Arc<dyn DocumentStore>,
    top_k: usize,
    failure_policy: FailurePolicy,
}

impl AnswerPipelineBuilder {
    /// Starts a builder; the same client serves both generation calls.
    pub fn new(client: Arc<dyn TextGenerator>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            client,
            store,
            top_k: DEFAULT_TOP_K,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Number of documents retrieved per question.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> AnswerPipeline {
        AnswerPipeline {
            rewriter: QuestionRewriter::new(Arc::clone(&self.client)),
            assembler: ContextAssembler::new(self.store).with_top_k(self.top_k),
            generator: AnswerGenerator::new(self.client),
            failure_policy: self.failure_policy,
        }
    }
}

/// Answers questions against a conversation history.
///
/// Holds no per-request state, so one instance serves concurrent requests.
pub struct AnswerPipeline {
    rewriter: QuestionRewriter,
    assembler: ContextAssembler,
    generator: AnswerGenerator,
    failure_policy: FailurePolicy,
}

impl AnswerPipeline {
    pub fn top_k(&self) -> usize {
        self.assembler.top_k()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Answers `question`, recording the exchange in `history`.
    ///
    /// The human turn is appended before the rewrite, so both prompts see the
    /// new question as the last history line. On success the answer is appended
    /// as an assistant turn; on failure the failure policy decides whether the
    /// human turn stays. Blank questions are rejected without touching `history`.
    pub fn answer(
        &self,
        question: &str,
        history: &mut ConversationHistory,
    ) -> Result<AnswerResult, AnswerError> {
        if question.trim().is_empty() {
            debug!(stage = %PipelineStage::Received, "rejecting empty question");
            return Err(AnswerError::InvalidInput);
        }

        let len_before = history.len();
        history.append(Turn::human(question));

        match self.run_stages(question, history) {
            Ok(result) => {
                history.append(Turn::assistant(result.answer_text()));
                info!(
                    stage = %PipelineStage::Completed,
                    links = result.links().len(),
                    sorry = result.is_sorry_answer(),
                    "question answered"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(stage = %PipelineStage::Failed, failed_in = %err.stage(), error = %err, "question failed");
                if self.failure_policy == FailurePolicy::RollBack {
                    history.rollback_to(len_before);
                }
                Err(err)
            }
        }
    }

    /// Answers within a session, holding the session lock for the whole cycle.
    pub fn answer_in_session(
        &self,
        sessions: &SessionStore,
        session: &SessionId,
        question: &str,
    ) -> Result<AnswerResult, AnswerError> {
        let span = info_span!("answer", session = %session);
        let _guard = span.enter();
        sessions.with_session(session, |history| self.answer(question, history))
    }

    fn run_stages(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<AnswerResult, AnswerError> {
        let chat_history = history.format();

        info!(stage = %PipelineStage::Rewriting, "rewriting question");
        debug!(question, "original question");
        let improved_question = self
            .rewriter
            .rewrite(question, &chat_history)
            .map_err(|e| AnswerError::upstream(PipelineStage::Rewriting, e))?;
        debug!(improved_question = %improved_question, "improved question");

        info!(stage = %PipelineStage::Retrieving, "retrieving context");
        let assembled = self
            .assembler
            .assemble(&improved_question)
            .map_err(|e| AnswerError::upstream(PipelineStage::Retrieving, e))?;
        debug!(context = %assembled.context, "retrieved context");

        info!(stage = %PipelineStage::Answering, "generating answer");
        let answer = self
            .generator
            .generate(&assembled.context, question, &chat_history)
            .map_err(|e| AnswerError::upstream(PipelineStage::Answering, e))?;
        debug!(answer = %answer, "final answer");

        if answer.trim().is_empty() {
            return Err(AnswerError::EmptyResult);
        }

        Ok(AnswerResult::new(answer, assembled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answerer::SORRY_NO_ANSWER;
    use crate::conversation::Role;
    use crate::ollama::OllamaError;
    use crate::store::{RetrievedDocument, StoreError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, recording every prompt.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, OllamaError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, OllamaError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl TextGenerator for ScriptedClient {
        fn generate(&self, prompt: &str) -> Result<String, OllamaError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("fallback".to_string()))
        }
    }

    struct FakeStore {
        result: Result<Vec<RetrievedDocument>, String>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn with_docs(urls: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(urls
                    .iter()
                    .enumerate()
                    .map(|(i, url)| RetrievedDocument::new(format!("body {i}"), *url))
                    .collect()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: Err("index offline".to_string()),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    impl DocumentStore for FakeStore {
        fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StoreError> {
            self.queries.lock().unwrap().push(query.to_string());
            match &self.result {
                Ok(docs) => Ok(docs.iter().take(k).cloned().collect()),
                Err(msg) => Err(StoreError::Http {
                    status: 503,
                    body: msg.clone(),
                }),
            }
        }

        fn count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn pipeline(client: Arc<ScriptedClient>, store: Arc<FakeStore>) -> AnswerPipeline {
        AnswerPipelineBuilder::new(client, store).build()
    }

    #[test]
    fn end_to_end_answer_with_two_documents() {
        let client = ScriptedClient::new(vec![Ok("What is X?".to_string()), Ok("X is Y.".to_string())]);
        let store = FakeStore::with_docs(&["u1", "u2"]);
        let pipeline = pipeline(client, store);
        let mut history = ConversationHistory::new();

        let result = pipeline.answer("What is X?", &mut history).unwrap();

        assert_eq!(result.answer_text(), "X is Y.");
        assert_eq!(
            result.citation_html(),
            "<br>Learn more:<br><a href='u1'>🔗 Article #1</a><a href='u2'>🔗 Article #2</a>"
        );
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].text(), "X is Y.");
    }

    #[test]
    fn rewritten_question_drives_retrieval_and_original_drives_answer() {
        let client = ScriptedClient::new(vec![
            Ok("What is deferrable loading in Angular 17?".to_string()),
            Ok("It lazy loads views.".to_string()),
        ]);
        let store = FakeStore::with_docs(&["u1"]);
        let pipeline = pipeline(client.clone(), store.clone());
        let mut history = ConversationHistory::new();

        pipeline.answer("whats defer?", &mut history).unwrap();

        assert_eq!(
            *store.queries.lock().unwrap(),
            vec!["What is deferrable loading in Angular 17?".to_string()]
        );
        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Question: whats defer?"));
        assert!(prompts[1].contains("Context: body 0"));
    }

    #[test]
    fn rewrite_prompt_history_already_contains_current_question() {
        let client = ScriptedClient::new(vec![Ok("q".to_string()), Ok("a".to_string())]);
        let pipeline = pipeline(client.clone(), FakeStore::with_docs(&[]));
        let mut history = ConversationHistory::new();

        pipeline.answer("first question", &mut history).unwrap();

        let prompts = client.prompts();
        assert!(prompts[0].contains("Conversation history: Human: first question"));
        assert!(prompts[1].contains("Conversation history: Human: first question"));
    }

    #[test]
    fn sorry_answer_clears_citations_even_with_documents() {
        let client = ScriptedClient::new(vec![Ok("q".to_string()), Ok(SORRY_NO_ANSWER.to_string())]);
        let pipeline = pipeline(client, FakeStore::with_docs(&["u1", "u2", "u3"]));
        let mut history = ConversationHistory::new();

        let result = pipeline.answer("Unrelated?", &mut history).unwrap();

        assert_eq!(result.answer_text(), SORRY_NO_ANSWER);
        assert_eq!(result.citation_html(), "");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn no_documents_means_empty_citations() {
        let client = ScriptedClient::new(vec![Ok("q".to_string()), Ok("General answer.".to_string())]);
        let pipeline = pipeline(client, FakeStore::with_docs(&[]));
        let mut history = ConversationHistory::new();

        let result = pipeline.answer("Anything?", &mut history).unwrap();
        assert_eq!(result.citation_html(), "");
        assert!(result.links().is_empty());
    }

    #[test]
    fn empty_question_is_rejected_before_any_call() {
        let client = ScriptedClient::new(vec![]);
        let store = FakeStore::with_docs(&["u1"]);
        let pipeline = pipeline(client.clone(), store.clone());
        let mut history = ConversationHistory::new();

        for question in ["", "   ", "\n\t"] {
            let err = pipeline.answer(question, &mut history).unwrap_err();
            assert!(matches!(err, AnswerError::InvalidInput));
        }

        assert!(history.is_empty());
        assert!(client.prompts().is_empty());
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn retrieval_failure_leaves_dangling_human_turn_by_default() {
        let client = ScriptedClient::new(vec![Ok("q".to_string())]);
        let pipeline = pipeline(client.clone(), FakeStore::failing());
        let mut history = ConversationHistory::new();

        let err = pipeline.answer("What is X?", &mut history).unwrap_err();

        assert!(matches!(
            err,
            AnswerError::UpstreamFailure {
                stage: PipelineStage::Retrieving,
                ..
            }
        ));
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role(), Role::Human);
        // Answer generation never ran.
        assert_eq!(client.prompts().len(), 1);
    }

    #[test]
    fn rollback_policy_restores_history_on_failure() {
        let client = ScriptedClient::new(vec![
            Ok("q1".to_string()),
            Ok("a1".to_string()),
            Err(OllamaError::Http { status: 500 }),
        ]);
        let pipeline = AnswerPipelineBuilder::new(client, FakeStore::with_docs(&["u1"]))
            .failure_policy(FailurePolicy::RollBack)
            .build();
        let mut history = ConversationHistory::new();

        pipeline.answer("first", &mut history).unwrap();
        let err = pipeline.answer("second", &mut history).unwrap_err();

        assert!(matches!(
            err,
            AnswerError::UpstreamFailure {
                stage: PipelineStage::Rewriting,
                ..
            }
        ));
        assert_eq!(history.len(), 2);
        assert!(history.is_alternating());
    }

    #[test]
    fn empty_answer_is_empty_result() {
        let client = ScriptedClient::new(vec![Ok("q".to_string()), Ok("  \n".to_string())]);
        let pipeline = pipeline(client, FakeStore::with_docs(&["u1"]));
        let mut history = ConversationHistory::new();

        let err = pipeline.answer("What?", &mut history).unwrap_err();
        assert!(matches!(err, AnswerError::EmptyResult));
        assert_eq!(err.user_message(), "Model invocation failed.");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn answer_generation_failure_is_upstream_failure() {
        let client = ScriptedClient::new(vec![
            Ok("q".to_string()),
            Err(OllamaError::Api {
                message: "model not found".to_string(),
            }),
        ]);
        let pipeline = pipeline(client, FakeStore::with_docs(&["u1"]));
        let mut history = ConversationHistory::new();

        let err = pipeline.answer("What?", &mut history).unwrap_err();
        assert_eq!(err.stage(), PipelineStage::Answering);
        assert!(!err.is_client_error());
    }

    #[test]
    fn n_cycles_keep_alternation() {
        let replies = (0..5)
            .flat_map(|n| [Ok(format!("rewritten {n}")), Ok(format!("answer {n}"))])
            .collect();
        let client = ScriptedClient::new(replies);
        let pipeline = pipeline(client, FakeStore::with_docs(&["u1"]));
        let mut history = ConversationHistory::new();

        for n in 0..5 {
            pipeline.answer(&format!("question {n}"), &mut history).unwrap();
        }

        assert_eq!(history.len(), 10);
        for (i, turn) in history.turns().iter().enumerate() {
            let expected = if i % 2 == 0 { Role::Human } else { Role::Assistant };
            assert_eq!(turn.role(), expected);
        }
    }

    #[test]
    fn answer_in_session_records_into_the_named_session() {
        let client = ScriptedClient::new(vec![Ok("q".to_string()), Ok("a".to_string())]);
        let pipeline = pipeline(client, FakeStore::with_docs(&["u1"]));
        let sessions = SessionStore::new();
        let alice = SessionId::new("alice");

        pipeline
            .answer_in_session(&sessions, &alice, "hello?")
            .unwrap();

        assert_eq!(sessions.snapshot(&alice).unwrap().len(), 2);
        assert!(sessions.snapshot(&SessionId::default()).is_none());
    }
}
