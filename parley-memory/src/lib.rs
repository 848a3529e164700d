//! Parley Memory - Conversation memory for the Parley chat proxy.
//!
//! This crate keeps every live dialog in process memory and bounds its growth:
//! - [`SessionStore`]: concurrent map of sessions with per-session locking
//! - [`compressor`]: folds old user/assistant pairs into one summary entry
//! - [`sweeper`]: periodic eviction of idle sessions
//!
//! ## Architecture
//!
//! ```text
//! turn → SessionStore::append_user ──→ HistoryCompressor::maybe_compress
//!                                          │  plan (locked)
//!                                          │  Summarizer::summarize (unlocked)
//!                                          └─ apply plan (locked, verified)
//! ```
//!
//! Sessions are volatile: nothing survives a process restart.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod compressor;
pub mod entry;
pub mod session;
pub mod store;
pub mod sweeper;

pub use compressor::{
    apply_plan, compress, select_for_compression, should_compress, CompressionError,
    CompressionOutcome, CompressionPlan, CompressionPolicy, HistoryCompressor, Summarizer,
    SUMMARY_INSTRUCTION,
};
pub use entry::{EntryKind, HistoryEntry};
pub use session::Session;
pub use store::{MemoryError, SessionStore, StoreStats};
pub use sweeper::spawn_sweeper;
