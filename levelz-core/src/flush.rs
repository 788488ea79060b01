//! Batch flusher: persists the experience queue in one transaction.
//!
//! A flush drains the queue, sums the deltas per (guild, user) and hands
//! one increment per player to [`PlayerStorage::batch_add_experience`].
//! Storage applies them atomically. When the transaction fails the batch is
//! logged and discarded; the in-memory records keep the awarded experience
//! until they are evicted, so the loss only shows after a reload.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{LevelzError, Result};
use crate::metrics::{LevelzCounters, spans};
use crate::queue::{ExperienceQueue, PendingMutation};
use crate::storage::{ExperienceUpdate, PlayerStorage};
use crate::types::PlayerKey;

/// Outcome of one successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Queue entries drained.
    pub entries: usize,
    /// Distinct players written.
    pub players: usize,
    /// Rows the storage reported as updated.
    pub rows: usize,
    /// Wall time spent in storage.
    pub elapsed: Duration,
}

impl FlushReport {
    /// Whether the flush had nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Sum drained mutations into one increment per player, ordered by key.
#[must_use]
pub fn aggregate(mutations: &[PendingMutation]) -> Vec<ExperienceUpdate> {
    let mut totals: BTreeMap<PlayerKey, i64> = BTreeMap::new();
    for mutation in mutations {
        let total = totals.entry(mutation.key()).or_insert(0);
        *total = total.saturating_add(mutation.amount);
    }
    totals
        .into_iter()
        .map(|(key, amount)| ExperienceUpdate { key, amount })
        .collect()
}

/// Drains an [`ExperienceQueue`] into a [`PlayerStorage`].
pub struct BatchFlusher {
    storage: Arc<dyn PlayerStorage>,
    queue: ExperienceQueue,
    counters: Arc<LevelzCounters>,
}

impl std::fmt::Debug for BatchFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFlusher")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl BatchFlusher {
    /// Create a flusher over a shared queue.
    #[must_use]
    pub fn new(
        storage: Arc<dyn PlayerStorage>,
        queue: ExperienceQueue,
        counters: Arc<LevelzCounters>,
    ) -> Self {
        Self {
            storage,
            queue,
            counters,
        }
    }

    /// Persist everything currently queued.
    ///
    /// # Errors
    ///
    /// Returns [`LevelzError::FlushFailed`] when the transaction rolled back.
    /// The drained batch is gone at that point.
    pub fn flush(&self) -> Result<FlushReport> {
        let _span = tracing::debug_span!(spans::FLUSH).entered();

        // Held until storage answers, so reloads wait out the commit.
        let batch = self.queue.begin_flush();
        let drained = batch.mutations();
        if drained.is_empty() {
            return Ok(FlushReport::default());
        }

        let updates = aggregate(drained);
        let start = Instant::now();

        match self.storage.batch_add_experience(&updates) {
            Ok(rows) => {
                let report = FlushReport {
                    entries: drained.len(),
                    players: updates.len(),
                    rows,
                    elapsed: start.elapsed(),
                };
                LevelzCounters::bump(&self.counters.flushes_completed);
                self.counters
                    .mutations_flushed
                    .fetch_add(drained.len() as u64, Ordering::Relaxed);
                self.counters.last_flush_micros.store(
                    u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );

                if rows < updates.len() {
                    debug!(
                        players = updates.len(),
                        rows, "Some flushed players had no stored row"
                    );
                }
                info!(
                    entries = report.entries,
                    players = report.players,
                    elapsed_ms = report.elapsed.as_millis(),
                    "Flushed experience batch"
                );
                Ok(report)
            }
            Err(e) => {
                LevelzCounters::bump(&self.counters.flush_failures);
                self.counters
                    .mutations_dropped
                    .fetch_add(drained.len() as u64, Ordering::Relaxed);
                error!(
                    entries = drained.len(),
                    players = updates.len(),
                    error = %e,
                    "Experience flush rolled back; batch discarded"
                );
                Err(LevelzError::FlushFailed {
                    entries: drained.len(),
                    players: updates.len(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// The queue this flusher drains.
    #[must_use]
    pub fn queue(&self) -> &ExperienceQueue {
        &self.queue
    }
}
