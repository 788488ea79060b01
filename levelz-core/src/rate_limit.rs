//! Award rate limiter: at most one experience award per player per window.
//!
//! The gate is a sharded [`DashMap`] from [`PlayerKey`] to the instant the
//! current window closes. [`AwardRateLimiter::try_consume`] takes the shard
//! lock once through the entry API, so two racing messages from the same
//! player can never both open the gate.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::types::{GuildId, PlayerKey, UserId};

/// Per-player award gate.
#[derive(Debug)]
pub struct AwardRateLimiter {
    windows: DashMap<PlayerKey, Instant>,
    window: Duration,
}

impl AwardRateLimiter {
    /// Create a limiter allowing one award per `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Length of one window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and starts a new window if the player has no open one.
    pub fn try_consume(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.try_consume_at(PlayerKey::new(guild_id, user_id), Instant::now())
    }

    fn try_consume_at(&self, key: PlayerKey, now: Instant) -> bool {
        let expires_at = now + self.window;
        match self.windows.entry(key) {
            Entry::Occupied(mut open) => {
                if *open.get() > now {
                    return false;
                }
                open.insert(expires_at);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Drop closed windows. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked windows, closed ones not yet purged included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
