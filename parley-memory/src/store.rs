//! Concurrent session store.
//!
//! Sessions live in a sharded [`DashMap`], each behind its own [`Mutex`].
//! Unrelated sessions never contend; operations on one session are
//! serialized by its mutex.
//!
//! # Locking
//!
//! A session mutex is only ever taken while a shard guard is held
//! (shard first, then session), and no guard survives an `.await`.
//! Closures passed to [`SessionStore::with_session_mut`] must therefore
//! stay synchronous and short.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::entry::HistoryEntry;
use crate::session::Session;

/// Errors raised by explicit session lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Store-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub sessions: usize,
    pub entries: usize,
}

/// Process-wide registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Mutex<Session>>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating a new one if `id` is absent or unknown.
    ///
    /// A hit updates the last-access time. An unknown id is not adopted:
    /// the new session always gets a freshly generated identifier.
    pub fn get_or_create(&self, id: Option<&str>) -> Session {
        if let Some(id) = id {
            if let Some(entry) = self.sessions.get(id) {
                let mut session = lock(entry.value());
                session.touch();
                return session.clone();
            }
            tracing::debug!(requested = %id, "Unknown session id, creating a new session");
        }

        let session = Session::new();
        let snapshot = session.clone();
        self.sessions
            .insert(session.id().to_string(), Mutex::new(session));
        tracing::debug!(session_id = %snapshot.id(), "Session created");
        snapshot
    }

    /// Snapshot of a session without creating it or touching it.
    pub fn get(&self, id: &str) -> Option<Session> {
        let entry = self.sessions.get(id)?;
        let snapshot = lock(entry.value()).clone();
        Some(snapshot)
    }

    /// Run `f` against a session under its lock, read-only.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Result<R, MemoryError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| MemoryError::SessionNotFound(id.to_string()))?;
        let session = lock(entry.value());
        Ok(f(&session))
    }

    /// Run `f` against a session under its lock, with mutable access.
    pub fn with_session_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, MemoryError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| MemoryError::SessionNotFound(id.to_string()))?;
        let mut session = lock(entry.value());
        Ok(f(&mut session))
    }

    /// Append a USER entry.
    pub fn append_user(&self, id: &str, text: impl Into<String>) -> Result<HistoryEntry, MemoryError> {
        self.append(id, HistoryEntry::user(text))
    }

    /// Append an ASSISTANT entry.
    pub fn append_assistant(
        &self,
        id: &str,
        text: impl Into<String>,
    ) -> Result<HistoryEntry, MemoryError> {
        self.append(id, HistoryEntry::assistant(text))
    }

    fn append(&self, id: &str, entry: HistoryEntry) -> Result<HistoryEntry, MemoryError> {
        self.with_session_mut(id, |session| {
            session.push(entry.clone());
            entry
        })
    }

    /// Complete USER→ASSISTANT pairs in a session.
    pub fn pair_count(&self, id: &str) -> Result<usize, MemoryError> {
        self.with_session(id, Session::pair_count)
    }

    /// Remove sessions idle for longer than `max_age`. Returns the number removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        match cutoff {
            Some(cutoff) => self.evict_idle_before(cutoff),
            None => 0,
        }
    }

    /// Remove sessions whose last access is strictly before `cutoff`.
    ///
    /// Candidates are collected first, then each removal re-checks the
    /// session under the shard write lock, so a session touched in between
    /// survives this sweep.
    pub fn evict_idle_before(&self, cutoff: DateTime<Utc>) -> usize {
        let candidates = self.idle_candidates(cutoff);
        if candidates.is_empty() {
            return 0;
        }

        let removed = self.remove_idle(&candidates, cutoff);
        if removed > 0 {
            tracing::info!(
                removed,
                candidates = candidates.len(),
                remaining = self.sessions.len(),
                "Evicted idle sessions"
            );
        }
        removed
    }

    fn idle_candidates(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| lock(entry.value()).last_accessed_at() < cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn remove_idle(&self, candidates: &[String], cutoff: DateTime<Utc>) -> usize {
        candidates
            .iter()
            .filter(|id| {
                self.sessions
                    .remove_if(id.as_str(), |_, session| {
                        lock(session).last_accessed_at() < cutoff
                    })
                    .is_some()
            })
            .count()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.sessions
            .iter()
            .fold(StoreStats::default(), |mut stats, entry| {
                stats.sessions += 1;
                stats.entries += lock(entry.value()).len();
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use std::sync::Arc;

    #[test]
    fn get_or_create_without_id_allocates() {
        let store = SessionStore::new();
        let a = store.get_or_create(None);
        let b = store.get_or_create(None);
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_or_create_reuses_known_id_and_touches() {
        let store = SessionStore::new();
        let created = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));

        let again = store.get_or_create(Some(created.id()));
        assert_eq!(again.id(), created.id());
        assert!(again.last_accessed_at() > created.last_accessed_at());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_adopted() {
        let store = SessionStore::new();
        let session = store.get_or_create(Some("made-up"));
        assert_ne!(session.id(), "made-up");
        assert!(store.get("made-up").is_none());
        assert!(store.get(session.id()).is_some());
    }

    #[test]
    fn get_does_not_touch() {
        let store = SessionStore::new();
        let created = store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));

        let seen = store.get(created.id()).unwrap();
        assert_eq!(seen.last_accessed_at(), created.last_accessed_at());
    }

    #[test]
    fn appends_keep_order_and_count_pairs() {
        let store = SessionStore::new();
        let id = store.get_or_create(None).id().to_string();

        store.append_user(&id, "hello").unwrap();
        assert_eq!(store.get(&id).unwrap().len(), 1);
        assert_eq!(store.pair_count(&id).unwrap(), 0);

        store.append_assistant(&id, "hi there").unwrap();
        assert_eq!(store.pair_count(&id).unwrap(), 1);

        let kinds: Vec<EntryKind> = store
            .get(&id)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EntryKind::User, EntryKind::Assistant]);
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let store = SessionStore::new();
        assert_eq!(
            store.append_user("nope", "x").unwrap_err(),
            MemoryError::SessionNotFound("nope".into())
        );
        assert!(store.pair_count("nope").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn evict_with_zero_age_removes_stale_sessions() {
        let store = SessionStore::new();
        store.get_or_create(None);
        store.get_or_create(None);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.evict_older_than(Duration::ZERO), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn evict_keeps_recent_sessions() {
        let store = SessionStore::new();
        store.get_or_create(None);
        assert_eq!(store.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn session_touched_after_check_survives() {
        let store = SessionStore::new();
        let id = store.get_or_create(None).id().to_string();
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Utc::now();

        let candidates = store.idle_candidates(cutoff);
        assert_eq!(candidates, vec![id.clone()]);

        std::thread::sleep(Duration::from_millis(5));
        store.append_user(&id, "still here").unwrap();

        assert_eq!(store.remove_idle(&candidates, cutoff), 0);
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn stats_count_sessions_and_entries() {
        let store = SessionStore::new();
        let a = store.get_or_create(None).id().to_string();
        store.get_or_create(None);
        store.append_user(&a, "q").unwrap();
        store.append_assistant(&a, "a").unwrap();

        assert_eq!(store.stats(), StoreStats { sessions: 2, entries: 2 });
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let store = Arc::new(SessionStore::new());
        let shared = store.get_or_create(None).id().to_string();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let own = store.get_or_create(None).id().to_string();
                    for i in 0..50 {
                        store.append_user(&shared, format!("{t}-{i}")).unwrap();
                        store.append_user(&own, format!("q{i}")).unwrap();
                        store.append_assistant(&own, format!("a{i}")).unwrap();
                    }
                    own
                })
            })
            .collect();

        let owned: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.get(&shared).unwrap().len(), 400);
        for id in owned {
            assert_eq!(store.pair_count(&id).unwrap(), 50);
        }
    }

    #[test]
    fn eviction_runs_alongside_turns() {
        let store = Arc::new(SessionStore::new());
        let sweeper = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    store.evict_older_than(Duration::from_secs(60));
                }
            })
        };

        for _ in 0..100 {
            let id = store.get_or_create(None).id().to_string();
            store.append_user(&id, "q").unwrap();
        }
        sweeper.join().unwrap();
        assert_eq!(store.len(), 100);
    }
}
