//! Session manager
//!
//! Wraps a [`BoundedLruCache`] with opaque session ids and a background
//! sweeper that evicts sessions past their inactivity timeout. The
//! sweeper wakes on its own interval or on an explicit
//! [`tokio::sync::Notify`] signal — the async equivalent of the
//! condition-variable wakeup this is modeled on — and exits as soon as
//! its [`CancellationToken`] is cancelled.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::BoundedLruCache;
use crate::error::RuntimeError;

/// A 128-bit-entropy opaque session identifier, rendered as a
/// 32-character lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked session. `last_activity_at >= created_at` always holds;
/// `get` refreshes `last_activity_at` on every successful lookup.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub event_stream_reference: Option<String>,
}

/// Bounded LRU cache of sessions plus an inactivity sweeper.
pub struct SessionManager {
    cache: BoundedLruCache<String, Session>,
    ttl: Duration,
    notify: Notify,
}

impl SessionManager {
    pub fn new(capacity: usize, ttl: Duration) -> Arc<Self> {
        Arc::new(SessionManager {
            cache: BoundedLruCache::new(capacity),
            ttl,
            notify: Notify::new(),
        })
    }

    /// Create a new session with a freshly generated id.
    pub fn create(&self) -> Session {
        let now = Instant::now();
        let session = Session {
            id: SessionId::generate(),
            created_at: now,
            last_activity_at: now,
            event_stream_reference: None,
        };
        self.cache.put(session.id.as_str().to_string(), session.clone());
        session
    }

    /// Look up a session by id, refreshing `last_activity_at`.
    pub fn get(&self, id: &str) -> Result<Session, RuntimeError> {
        let mut session = self
            .cache
            .get(&id.to_string())
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))?;
        session.last_activity_at = Instant::now();
        self.cache.put(id.to_string(), session.clone());
        Ok(session)
    }

    /// Attach (or clear) the SSE stream reference for `id` without
    /// otherwise touching its recency.
    pub fn set_event_stream_reference(
        &self,
        id: &str,
        reference: Option<String>,
    ) -> Result<(), RuntimeError> {
        let mut session = self
            .cache
            .get(&id.to_string())
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))?;
        session.event_stream_reference = reference;
        self.cache.put(id.to_string(), session);
        Ok(())
    }

    /// Terminate a session. The second call on an already-terminated id
    /// returns `SessionNotFound` and leaves state unchanged.
    pub fn terminate(&self, id: &str) -> Result<(), RuntimeError> {
        self.cache
            .remove(&id.to_string())
            .map(|_| ())
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))
    }

    /// Remove every session whose inactivity exceeds `ttl`.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.cache
            .retain(|_, session| now.saturating_duration_since(session.last_activity_at) <= ttl);
    }

    /// Wake the sweeper immediately instead of waiting for its interval.
    pub fn wake_sweeper(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Spawn the background sweeper task. It wakes every
    /// `sweep_interval`, or immediately on [`SessionManager::wake_sweeper`],
    /// and exits once `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(sweep_interval) => {}
                    _ = manager.notify.notified() => {}
                    _ = shutdown.cancelled() => break,
                }
                manager.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn create_assigns_a_32_char_hex_id_with_nondecreasing_activity() {
        let manager = SessionManager::new(10, Duration::from_secs(60));
        let session = manager.create();
        assert_eq!(session.id.as_str().len(), 32);
        assert!(session.id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(session.last_activity_at >= session.created_at);
    }

    #[test]
    fn get_refreshes_last_activity_and_terminate_is_idempotent() {
        let manager = SessionManager::new(10, Duration::from_secs(60));
        let created = manager.create();
        thread::sleep(Duration::from_millis(5));

        let fetched = manager.get(created.id.as_str()).unwrap();
        assert!(fetched.last_activity_at > created.last_activity_at);

        manager.terminate(created.id.as_str()).unwrap();
        let err = manager.terminate(created.id.as_str()).unwrap_err();
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
    }

    #[test]
    fn get_missing_session_is_session_not_found() {
        let manager = SessionManager::new(10, Duration::from_secs(60));
        let err = manager.get("0000000000000000000000000000000").unwrap_err();
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
    }

    #[test]
    fn sweep_evicts_sessions_past_their_ttl() {
        let manager = SessionManager::new(10, Duration::from_millis(10));
        let session = manager.create();
        thread::sleep(Duration::from_millis(30));
        manager.sweep();
        let err = manager.get(session.id.as_str()).unwrap_err();
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn spawn_sweeper_exits_promptly_on_cancellation() {
        let manager = SessionManager::new(10, Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let handle = manager.spawn_sweeper(Duration::from_secs(60), shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit promptly after cancellation")
            .unwrap();
    }
}
