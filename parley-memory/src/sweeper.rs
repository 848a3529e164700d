//! Periodic eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::store::SessionStore;

/// Spawn a task that evicts sessions idle longer than `max_idle` every `interval`.
///
/// The first sweep runs one full interval after spawning. Abort the
/// returned handle on shutdown.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    tracing::info!(
        interval_secs = interval.as_secs(),
        max_idle_secs = max_idle.as_secs(),
        "Session sweeper started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.evict_older_than(max_idle);
            tracing::debug!(removed, live = store.len(), "Session sweep finished");
        }
    })
}
