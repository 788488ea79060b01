//! Experience queue: awards waiting for the next batch flush.
//!
//! Producers append one [`PendingMutation`] per award; nothing is
//! pre-aggregated. The flusher takes the whole buffer with
//! [`ExperienceQueue::begin_flush`], which swaps it for an empty one while
//! holding the lock, so every appended entry is handed out exactly once.
//!
//! The queue also tracks flushes: a generation counter moves when a batch
//! leaves the buffer and again when its flush ends. A reader that sees the
//! same generation before reading storage and after reading
//! [`pending_for`](ExperienceQueue::pending_for) knows no batch moved from
//! the queue into storage in between.
//!
//! Cloning the queue shares the buffer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::types::{GuildId, PlayerKey, UserId};

/// One not-yet-persisted experience award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Player receiving the award.
    pub user_id: UserId,
    /// Guild the award belongs to.
    pub guild_id: GuildId,
    /// Experience delta.
    pub amount: i64,
    /// When the award was made.
    pub timestamp: DateTime<Utc>,
}

impl PendingMutation {
    /// The player this mutation targets.
    #[must_use]
    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.guild_id, self.user_id)
    }
}

/// Statistics about the experience queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries waiting right now.
    pub depth: usize,
    /// Entries ever enqueued.
    pub total_enqueued: u64,
    /// Entries ever handed out by a drain.
    pub total_drained: u64,
    /// Flush generation, see [`ExperienceQueue::generation`].
    pub generation: u64,
    /// Flushes that drained a batch and have not finished yet.
    pub flushes_in_flight: usize,
}

struct QueueInner {
    pending: Vec<PendingMutation>,
    total_enqueued: u64,
    total_drained: u64,
    generation: u64,
    flushes_in_flight: usize,
}

impl QueueInner {
    fn take(&mut self) -> Vec<PendingMutation> {
        let drained = std::mem::take(&mut self.pending);
        self.total_drained += drained.len() as u64;
        self.generation += 1;
        drained
    }
}

struct QueueShared {
    state: Mutex<QueueInner>,
    idle: Condvar,
}

/// Thread-safe, append-only buffer of pending awards.
pub struct ExperienceQueue {
    inner: Arc<QueueShared>,
}

impl Default for ExperienceQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExperienceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperienceQueue")
            .field("depth", &self.len())
            .finish()
    }
}

impl ExperienceQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueShared {
                state: Mutex::new(QueueInner {
                    pending: Vec::new(),
                    total_enqueued: 0,
                    total_drained: 0,
                    generation: 0,
                    flushes_in_flight: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Append an award.
    pub fn enqueue(&self, user_id: UserId, guild_id: GuildId, amount: i64) {
        let mutation = PendingMutation {
            user_id,
            guild_id,
            amount,
            timestamp: Utc::now(),
        };
        let mut inner = self.inner.state.lock();
        inner.pending.push(mutation);
        inner.total_enqueued += 1;
    }

    /// Take every pending entry, leaving the queue empty.
    ///
    /// Entries taken here are not tracked as in flight; flushers use
    /// [`begin_flush`](Self::begin_flush).
    pub fn drain(&self) -> Vec<PendingMutation> {
        self.inner.state.lock().take()
    }

    /// Take every pending entry for a flush. Until the returned guard is
    /// dropped the flush counts as in flight and
    /// [`wait_for_idle`](Self::wait_for_idle) blocks.
    pub fn begin_flush(&self) -> InFlightFlush {
        let mutations = {
            let mut inner = self.inner.state.lock();
            inner.flushes_in_flight += 1;
            inner.take()
        };
        InFlightFlush {
            queue: self.clone(),
            mutations,
        }
    }

    fn end_flush(&self) {
        let mut inner = self.inner.state.lock();
        inner.flushes_in_flight = inner.flushes_in_flight.saturating_sub(1);
        inner.generation += 1;
        if inner.flushes_in_flight == 0 {
            self.inner.idle.notify_all();
        }
    }

    /// Block until no flush is in flight, then return the generation.
    pub fn wait_for_idle(&self) -> u64 {
        let mut inner = self.inner.state.lock();
        while inner.flushes_in_flight > 0 {
            self.inner.idle.wait(&mut inner);
        }
        inner.generation
    }

    /// Counter that moves whenever a batch leaves the queue or a flush ends.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Sum of the deltas still waiting for one player.
    #[must_use]
    pub fn pending_for(&self, key: PlayerKey) -> i64 {
        self.pending_with_generation(key).0
    }

    /// [`pending_for`](Self::pending_for) together with the generation it
    /// was read at.
    #[must_use]
    pub fn pending_with_generation(&self, key: PlayerKey) -> (i64, u64) {
        let inner = self.inner.state.lock();
        let pending = inner
            .pending
            .iter()
            .filter(|m| m.key() == key)
            .fold(0_i64, |sum, m| sum.saturating_add(m.amount));
        (pending, inner.generation)
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().pending.is_empty()
    }

    /// Get queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.state.lock();
        QueueStats {
            depth: inner.pending.len(),
            total_enqueued: inner.total_enqueued,
            total_drained: inner.total_drained,
            generation: inner.generation,
            flushes_in_flight: inner.flushes_in_flight,
        }
    }
}

impl Clone for ExperienceQueue {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A drained batch whose flush has not finished.
///
/// Dropping it, after a commit, a rollback or a panic, ends the flush.
#[must_use = "the flush ends when this guard is dropped"]
pub struct InFlightFlush {
    queue: ExperienceQueue,
    mutations: Vec<PendingMutation>,
}

impl InFlightFlush {
    /// The drained entries.
    #[must_use]
    pub fn mutations(&self) -> &[PendingMutation] {
        &self.mutations
    }
}

impl std::fmt::Debug for InFlightFlush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightFlush")
            .field("entries", &self.mutations.len())
            .finish()
    }
}

impl Drop for InFlightFlush {
    fn drop(&mut self) {
        self.queue.end_flush();
    }
}
