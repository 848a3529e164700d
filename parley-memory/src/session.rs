//! A single dialog session.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entry::{EntryKind, HistoryEntry};

/// One live dialog: an ordered entry log plus access bookkeeping.
///
/// Entries are append-only except for [`Session::replace_prefix_with_summary`],
/// which swaps a prefix of the log for a single summary entry.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: String,
    entries: Vec<HistoryEntry>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session with a fresh UUID v4 identifier.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Entries in dialog order.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    /// Mark the session as accessed now.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    /// Append an entry and mark the session as accessed.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        self.touch();
    }

    /// Number of USER entries immediately followed by an ASSISTANT entry.
    ///
    /// Summaries never take part in a pair, and an unanswered trailing
    /// user entry is not counted.
    pub fn pair_count(&self) -> usize {
        count_pairs(&self.entries)
    }

    /// Replace the first `count` entries with one SUMMARY entry at the front.
    ///
    /// `count` is clamped to the log length. Returns the number of entries removed.
    pub fn replace_prefix_with_summary(&mut self, count: usize, summary: impl Into<String>) -> usize {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
        self.entries.insert(0, HistoryEntry::summary(summary));
        self.touch();
        count
    }

    /// Whether the log starts with exactly these entry ids.
    pub fn has_prefix(&self, ids: &[String]) -> bool {
        ids.len() <= self.entries.len()
            && self.entries.iter().zip(ids).all(|(entry, id)| entry.id == *id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn count_pairs(entries: &[HistoryEntry]) -> usize {
    entries
        .windows(2)
        .filter(|w| w[0].kind == EntryKind::User && w[1].kind == EntryKind::Assistant)
        .count()
}
