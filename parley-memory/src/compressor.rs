//! History compression.
//!
//! When a session accumulates enough complete USER→ASSISTANT pairs, the
//! oldest pairs are summarized by the model and replaced with one SUMMARY
//! entry. A pass has three steps:
//!
//! 1. select a [`CompressionPlan`] under the session lock
//! 2. call the [`Summarizer`] with no lock held
//! 3. apply the plan under the lock, after checking that the session
//!    prefix still matches what was planned
//!
//! A plan whose prefix changed in the meantime is rejected with
//! [`CompressionError::StalePlan`] and never applied twice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::entry::{EntryKind, HistoryEntry};
use crate::session::Session;
use crate::store::{MemoryError, SessionStore};

/// Instruction appended to the entries sent for summarization.
pub const SUMMARY_INSTRUCTION: &str =
    "Produce a concise summary of the following exchange, preserving key facts and open questions.";

/// Compression failures. Callers treat these as non-fatal.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Invalid compression policy: pairs_per_pass ({pairs_per_pass}) must be between 1 and threshold ({threshold})")]
    InvalidPolicy {
        threshold: usize,
        pairs_per_pass: usize,
    },

    #[error(transparent)]
    Session(#[from] MemoryError),

    #[error("Summarization failed: {0}")]
    Summarization(#[source] anyhow::Error),

    #[error("Summarizer returned an empty summary")]
    EmptySummary,

    #[error("Session {session_id} changed while its summary was being produced")]
    StalePlan { session_id: String },
}

/// Produces summary text for a run of history entries.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `entries`, oldest first.
    async fn summarize(&self, entries: &[HistoryEntry]) -> anyhow::Result<String>;
}

/// When and how much to compress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    threshold: usize,
    pairs_per_pass: usize,
}

impl CompressionPolicy {
    /// Build a policy; requires `1 <= pairs_per_pass <= threshold`.
    pub fn new(threshold: usize, pairs_per_pass: usize) -> Result<Self, CompressionError> {
        if pairs_per_pass == 0 || pairs_per_pass > threshold {
            return Err(CompressionError::InvalidPolicy {
                threshold,
                pairs_per_pass,
            });
        }
        Ok(Self {
            threshold,
            pairs_per_pass,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pairs_per_pass(&self) -> usize {
        self.pairs_per_pass
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            pairs_per_pass: 3,
        }
    }
}

/// Entries selected for one compression pass.
#[derive(Debug, Clone)]
pub struct CompressionPlan {
    /// Selected entries in log order
    pub entries: Vec<HistoryEntry>,
    /// Number of log entries the plan covers, counted from the front
    pub consumed: usize,
    /// Complete pairs among the selected entries
    pub pairs: usize,
    /// Ids of the selected entries, used to detect a changed prefix
    pub entry_ids: Vec<String>,
}

impl CompressionPlan {
    pub fn is_empty(&self) -> bool {
        self.consumed == 0
    }
}

/// Result of an applied compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOutcome {
    pub pairs_compressed: usize,
    pub entries_removed: usize,
    pub entries_after: usize,
}

/// Whether `session` has reached the policy threshold.
pub fn should_compress(session: &Session, policy: &CompressionPolicy) -> bool {
    session.pair_count() >= policy.threshold()
}

/// Select up to `pairs_to_compress` complete pairs from the front of the log.
///
/// Entries that are not part of a pair (an earlier summary, an orphan
/// message) are carried along when they sit before a selected pair. The
/// plan always ends on a completed pair, so an unanswered trailing USER
/// entry is never selected.
pub fn select_for_compression(session: &Session, pairs_to_compress: usize) -> CompressionPlan {
    let entries = session.entries();
    let mut pairs = 0;
    let mut consumed = 0;
    let mut i = 0;

    while i < entries.len() && pairs < pairs_to_compress {
        let is_pair = entries[i].kind == EntryKind::User
            && entries
                .get(i + 1)
                .is_some_and(|next| next.kind == EntryKind::Assistant);

        if is_pair {
            pairs += 1;
            i += 2;
            consumed = i;
        } else {
            i += 1;
        }
    }

    let selected = entries[..consumed].to_vec();
    let entry_ids = selected.iter().map(|e| e.id.clone()).collect();

    CompressionPlan {
        entries: selected,
        consumed,
        pairs,
        entry_ids,
    }
}

/// Replace the first `consumed` entries with a summary entry.
pub fn compress(session: &mut Session, summary_text: impl Into<String>, consumed: usize) -> usize {
    session.replace_prefix_with_summary(consumed, summary_text)
}

/// Apply `plan` if the session still starts with the planned entries.
pub fn apply_plan(
    session: &mut Session,
    plan: &CompressionPlan,
    summary_text: &str,
) -> Result<usize, CompressionError> {
    if !session.has_prefix(&plan.entry_ids) {
        return Err(CompressionError::StalePlan {
            session_id: session.id().to_string(),
        });
    }
    Ok(compress(session, summary_text, plan.consumed))
}

/// Runs compression passes against a [`SessionStore`].
#[derive(Clone)]
pub struct HistoryCompressor {
    policy: CompressionPolicy,
    summarizer: Arc<dyn Summarizer>,
}

impl HistoryCompressor {
    pub fn new(policy: CompressionPolicy, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { policy, summarizer }
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    /// Compress the session if it has reached the threshold.
    ///
    /// Returns `Ok(None)` when no compression was due.
    pub async fn maybe_compress(
        &self,
        store: &SessionStore,
        session_id: &str,
    ) -> Result<Option<CompressionOutcome>, CompressionError> {
        let plan = store.with_session(session_id, |session| {
            should_compress(session, &self.policy)
                .then(|| select_for_compression(session, self.policy.pairs_per_pass()))
        })?;

        let Some(plan) = plan.filter(|plan| !plan.is_empty()) else {
            return Ok(None);
        };

        tracing::debug!(
            session_id = %session_id,
            pairs = plan.pairs,
            entries = plan.consumed,
            "Summarizing history"
        );

        let summary = self
            .summarizer
            .summarize(&plan.entries)
            .await
            .map_err(CompressionError::Summarization)?;

        if summary.trim().is_empty() {
            return Err(CompressionError::EmptySummary);
        }

        let (removed, entries_after) = store.with_session_mut(session_id, |session| {
            apply_plan(session, &plan, &summary).map(|removed| (removed, session.len()))
        })??;

        tracing::info!(
            session_id = %session_id,
            pairs = plan.pairs,
            removed,
            entries_after,
            "History compressed"
        );

        Ok(Some(CompressionOutcome {
            pairs_compressed: plan.pairs,
            entries_removed: removed,
            entries_after,
        }))
    }
}

impl std::fmt::Debug for HistoryCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCompressor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
