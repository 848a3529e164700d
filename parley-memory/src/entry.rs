//! Dialog history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    /// Message from the user
    User,
    /// Reply from the model
    Assistant,
    /// Synthetic summary of compressed entries
    Summary,
}

impl EntryKind {
    /// Role used when the entry is sent upstream.
    ///
    /// Summaries travel as user messages.
    pub fn upstream_role(self) -> &'static str {
        match self {
            Self::User | Self::Summary => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Uppercase name used in history responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::Summary => "SUMMARY",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of dialog history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique entry id
    pub id: String,
    pub kind: EntryKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(EntryKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Assistant, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Summary, content)
    }

    /// Creation time as Unix milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}
