//! Session storage.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::models::ChatTurn;

/// One browser conversation.
///
/// History is append-only. Rounds for the same session are serialized by
/// [`Session::begin_round`]; callers hold the returned guard for the whole
/// round so two completions never interleave their appends.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    /// Milliseconds since the epoch of the last access.
    last_active: AtomicI64,
    history: RwLock<Vec<ChatTurn>>,
    /// Message ids that already had a stream opened.
    streamed: Mutex<HashSet<String>>,
    round_lock: Arc<Mutex<()>>,
}

/// Held for the duration of one chat round.
#[derive(Debug)]
pub struct RoundGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active: AtomicI64::new(now.timestamp_millis()),
            history: RwLock::new(Vec::new()),
            streamed: Mutex::new(HashSet::new()),
            round_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_active.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    /// Mark the session as used now.
    pub fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Append a turn to the history.
    pub async fn push(&self, turn: ChatTurn) {
        self.history.write().await.push(turn);
        self.touch();
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.read().await.clone()
    }

    pub async fn turn_count(&self) -> usize {
        self.history.read().await.len()
    }

    /// Wait until no other round is running for this session, then claim it.
    pub async fn begin_round(&self) -> RoundGuard {
        let guard = self.round_lock.clone().lock_owned().await;
        RoundGuard { _guard: guard }
    }

    /// Whether a round currently holds the session.
    pub fn is_busy(&self) -> bool {
        self.round_lock.try_lock().is_err()
    }

    /// Record that a stream was opened for `message_id`.
    ///
    /// Returns `false` if the id was already claimed.
    pub async fn claim_message(&self, message_id: &str) -> bool {
        self.streamed.lock().await.insert(message_id.to_string())
    }
}

/// Storage for chat sessions.
///
/// The server only depends on this trait, so a disk- or cache-backed store can
/// replace the in-memory one without touching the round logic.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session for `id`, inserting an empty one if it is unknown.
    async fn get_or_create(&self, id: &str) -> Arc<Session>;

    /// Look up a session without creating it.
    async fn get(&self, id: &str) -> Option<Arc<Session>>;

    /// Remove a session. Returns whether it existed.
    async fn evict(&self, id: &str) -> bool;

    /// Remove sessions idle for longer than `ttl` that have no round running.
    async fn sweep_idle(&self, ttl: Duration) -> usize;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Process-memory session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: &str) -> Arc<Session> {
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, "Creating chat session");
                Arc::new(Session::new(id))
            })
            .value()
            .clone();
        session.touch();
        session
    }

    async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    async fn evict(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Evicted chat session");
        }
        removed
    }

    async fn sweep_idle(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_active() >= cutoff || session.is_busy());
        before.saturating_sub(self.sessions.len())
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}
