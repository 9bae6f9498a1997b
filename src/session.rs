//! Per-session conversation state.
//!
//! Each session owns one `ConversationHistory` behind its own mutex. A request
//! holds that lock for its whole answer cycle, so requests within a session run
//! one at a time in lock-acquisition order while different sessions proceed
//! independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conversation::ConversationHistory;

/// Key of the session used when a caller does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// Identifier of a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id, falling back to [`DEFAULT_SESSION`] when blank.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            Self::default()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self(DEFAULT_SESSION.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Number of sessions kept before the least recently used one is forgotten.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

#[derive(Debug)]
struct Entry {
    history: SharedHistory,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, Entry>,
    clock: u64,
}

impl Registry {
    fn evict_least_recent(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            self.sessions.remove(&id);
            debug!(session = %id, "evicted least recently used session");
        }
    }
}

/// In-memory registry of conversation histories keyed by session.
///
/// Session keys come from clients, so the registry holds at most
/// `max_sessions` histories and forgets the least recently used one when a new
/// key arrives at capacity. A request already holding an evicted history
/// finishes against it normally. State lives for the process lifetime only.
#[derive(Debug)]
pub struct SessionStore {
    registry: Mutex<Registry>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_max_sessions(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding at most `max_sessions` histories (minimum 1).
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Returns the history handle for `id`, creating an empty one if needed.
    pub fn handle(&self, id: &SessionId) -> SharedHistory {
        let mut registry = self.lock_registry();
        registry.clock += 1;
        let now = registry.clock;

        if !registry.sessions.contains_key(id) && registry.sessions.len() >= self.max_sessions {
            registry.evict_least_recent();
        }

        let entry = registry.sessions.entry(id.clone()).or_insert_with(|| Entry {
            history: SharedHistory::default(),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.history)
    }

    /// Runs `f` with exclusive access to the session's history.
    ///
    /// The registry lock is released before `f` runs; only the session's own
    /// lock is held.
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        let handle = self.handle(id);
        let mut history = lock_history(&handle);
        f(&mut history)
    }

    /// Returns a copy of the session's history, or `None` if it is not held.
    pub fn snapshot(&self, id: &SessionId) -> Option<ConversationHistory> {
        let handle = self
            .lock_registry()
            .sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.history))?;
        let snapshot = lock_history(&handle).clone();
        Some(snapshot)
    }

    /// Forgets a session. Returns `true` if it existed.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.lock_registry().sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock_registry().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Poison is ignored: a panic mid-request leaves at most a dangling human turn.
fn lock_history(handle: &SharedHistory) -> MutexGuard<'_, ConversationHistory> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
