//! Conversation sessions and the registry that owns them.
//!
//! Each session sits behind its own async mutex. A request locks its session
//! for its whole lifetime, so a second request for the same id waits until the
//! first one has committed its turns (tokio mutexes are fair, so waiters are
//! served in arrival order). Different sessions never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chat::{ChatMessage, Role};
use crate::error::SessionError;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(1800);
pub const DEFAULT_MAX_TURNS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct GenerationSession {
    id: String,
    history: VecDeque<ChatTurn>,
    max_turns: usize,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    pub context: HashMap<String, serde_json::Value>,
}

impl GenerationSession {
    pub fn new(id: impl Into<String>, max_turns: usize) -> Self {
        Self {
            id: id.into(),
            history: VecDeque::new(),
            max_turns: max_turns.max(1),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            context: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Append a turn, evicting the oldest ones beyond the ceiling.
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(ChatTurn {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        while self.history.len() > self.max_turns {
            self.history.pop_front();
        }
        self.touch();
        debug!(session = %short_id(&self.id), ?role, "added turn");
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatTurn> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// History as chat messages, optionally only the last `last_n` turns.
    pub fn messages(&self, last_n: Option<usize>) -> Vec<ChatMessage> {
        let skip = last_n.map_or(0, |n| self.history.len().saturating_sub(n));
        self.history
            .iter()
            .skip(skip)
            .map(|t| ChatMessage::new(t.role, t.content.clone()))
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        info!(session = %short_id(&self.id), "history cleared");
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

pub type SessionHandle = Arc<Mutex<GenerationSession>>;

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    timeout: Duration,
    max_turns: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT, DEFAULT_MAX_TURNS)
    }
}

impl SessionRegistry {
    pub fn new(timeout: Duration, max_turns: usize) -> Self {
        info!(timeout_secs = timeout.as_secs(), max_turns, "session registry initialised");
        Self {
            sessions: DashMap::new(),
            timeout,
            max_turns,
        }
    }

    pub fn create(&self, id: Option<String>) -> (String, SessionHandle) {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = self.new_handle(&id);
        self.sessions.insert(id.clone(), Arc::clone(&handle));
        info!(session = %short_id(&id), "created session");
        (id, handle)
    }

    /// Look up a live session. Expired sessions are removed on the way.
    pub fn get(&self, id: &str) -> Result<SessionHandle, SessionError> {
        let handle = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if self.expired(&handle) {
            warn!(session = %short_id(id), "session expired, removing");
            self.sessions.remove(id);
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(handle)
    }

    /// Reuse `id` when it is live, otherwise start a fresh session (keeping
    /// the requested id when there was one). Lookup and insert happen under
    /// one map entry, so concurrent first requests for an id share a handle.
    pub fn get_or_create(&self, id: Option<&str>) -> (String, SessionHandle) {
        let Some(id) = id else {
            return self.create(None);
        };
        let handle = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if self.expired(entry.get()) {
                    warn!(session = %short_id(id), "session expired, starting fresh");
                    entry.insert(self.new_handle(id));
                }
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                info!(session = %short_id(id), "created session");
                Arc::clone(entry.insert(self.new_handle(id)).value())
            }
        };
        (id.to_string(), handle)
    }

    fn new_handle(&self, id: &str) -> SessionHandle {
        Arc::new(Mutex::new(GenerationSession::new(id, self.max_turns)))
    }

    pub fn reset(&self, id: &str) -> Result<(), SessionError> {
        self.sessions
            .remove(id)
            .map(|_| info!(session = %short_id(id), "session reset"))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Drop every expired session; returns how many went.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !self.expired(handle));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "cleaned up expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// A session locked by an in-flight request counts as active.
    fn expired(&self, handle: &SessionHandle) -> bool {
        match handle.try_lock() {
            Ok(session) => session.is_expired(self.timeout),
            Err(_) => false,
        }
    }
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}
