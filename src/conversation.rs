//! Conversation turns and the running transcript used for prompting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    /// Role implied by a turn's position: even indices are human, odd are assistant.
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Role::Human
        } else {
            Role::Assistant
        }
    }

    /// Transcript label for this role.
    pub fn label(self) -> &'static str {
        match self {
            Role::Human => "Human",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single message in the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    /// Creates a turn spoken by the user.
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
        }
    }

    /// Creates a turn produced by the assistant.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Ordered, append-only record of a conversation.
///
/// Turns are expected to alternate human/assistant starting with a human turn,
/// but `format` derives labels from position alone, so a dangling human turn
/// left by a failed request shifts every later label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn to the end of the history.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Drops every turn after the first `len`. No-op when `len >= self.len()`.
    pub fn rollback_to(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    /// Lazily renders `"<Label>: <text>"` lines, labelling by index parity.
    ///
    /// The iterator borrows the history, so it can be recreated at will and
    /// always yields the same lines until the next append.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.turns
            .iter()
            .enumerate()
            .map(|(i, turn)| format!("{}: {}", Role::for_index(i).label(), turn.text))
    }

    /// Renders the whole transcript, one turn per line.
    pub fn format(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }

    /// True when roles follow the human/assistant alternation from index 0.
    pub fn is_alternating(&self) -> bool {
        self.turns
            .iter()
            .enumerate()
            .all(|(i, turn)| turn.role == Role::for_index(i))
    }
}

impl fmt::Display for ConversationHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_formats_to_empty_string() {
        let history = ConversationHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.format(), "");
    }

    #[test]
    fn format_labels_by_index_parity() {
        let mut history = ConversationHistory::new();
        history.append(Turn::human("What is Rust?"));
        history.append(Turn::assistant("A systems language."));
        history.append(Turn::human("Is it fast?"));

        assert_eq!(
            history.format(),
            "Human: What is Rust?\nAssistant: A systems language.\nHuman: Is it fast?"
        );
    }

    #[test]
    fn format_is_idempotent() {
        let mut history = ConversationHistory::new();
        history.append(Turn::human("one"));
        history.append(Turn::assistant("two"));

        let first = history.format();
        let second = history.format();
        assert_eq!(first, second);
        assert_eq!(history.lines().count(), 2);
        assert_eq!(history.lines().count(), 2);
    }

    #[test]
    fn dangling_human_turn_shifts_labels() {
        let mut history = ConversationHistory::new();
        history.append(Turn::human("failed question"));
        history.append(Turn::human("retry"));
        history.append(Turn::assistant("answer"));

        assert!(!history.is_alternating());
        assert_eq!(
            history.format(),
            "Human: failed question\nAssistant: retry\nHuman: answer"
        );
    }

    #[test]
    fn rollback_truncates_to_length() {
        let mut history = ConversationHistory::new();
        history.append(Turn::human("a"));
        history.append(Turn::assistant("b"));
        history.append(Turn::human("c"));

        history.rollback_to(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(Turn::text), Some("b"));

        history.rollback_to(10);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn history_serializes_as_array_of_turns() {
        let mut history = ConversationHistory::new();
        history.append(Turn::human("hi"));

        let json = serde_json::to_string(&history).unwrap();
        assert_eq!(json, r#"[{"role":"human","text":"hi"}]"#);
    }
}
