//! Runtime counters for the experience engine.
//!
//! Lock-free `AtomicU64` counters bumped on the hot path and read when a
//! snapshot is exported, either as Prometheus text or as JSON for the
//! integration layer's status output.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Global Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency events.
#[derive(Debug)]
pub struct LevelzCounters {
    /// Messages offered to the engine.
    pub messages_seen: AtomicU64,
    /// Awards that passed the gate and were enqueued.
    pub awards_granted: AtomicU64,
    /// Awards refused by the rate limiter.
    pub awards_throttled: AtomicU64,
    /// Level-ups observed.
    pub level_ups: AtomicU64,
    /// Records created on first sight.
    pub players_created: AtomicU64,
    /// Metadata write-throughs.
    pub metadata_updates: AtomicU64,
    /// Flushes that committed.
    pub flushes_completed: AtomicU64,
    /// Flushes that rolled back.
    pub flush_failures: AtomicU64,
    /// Queue entries persisted.
    pub mutations_flushed: AtomicU64,
    /// Queue entries discarded by failed flushes.
    pub mutations_dropped: AtomicU64,
    /// Storage errors converted to safe defaults.
    pub storage_errors: AtomicU64,
    /// Duration of the last successful flush, in microseconds.
    pub last_flush_micros: AtomicU64,
}

impl LevelzCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_seen: AtomicU64::new(0),
            awards_granted: AtomicU64::new(0),
            awards_throttled: AtomicU64::new(0),
            level_ups: AtomicU64::new(0),
            players_created: AtomicU64::new(0),
            metadata_updates: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            mutations_flushed: AtomicU64::new(0),
            mutations_dropped: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            last_flush_micros: AtomicU64::new(0),
        }
    }

    /// Add one to a counter.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_seen: self.messages_seen.load(Ordering::Relaxed),
            awards_granted: self.awards_granted.load(Ordering::Relaxed),
            awards_throttled: self.awards_throttled.load(Ordering::Relaxed),
            level_ups: self.level_ups.load(Ordering::Relaxed),
            players_created: self.players_created.load(Ordering::Relaxed),
            metadata_updates: self.metadata_updates.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            mutations_flushed: self.mutations_flushed.load(Ordering::Relaxed),
            mutations_dropped: self.mutations_dropped.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            last_flush_micros: self.last_flush_micros.load(Ordering::Relaxed),
        }
    }
}

impl Default for LevelzCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Messages offered to the engine.
    pub messages_seen: u64,
    /// Awards granted.
    pub awards_granted: u64,
    /// Awards throttled.
    pub awards_throttled: u64,
    /// Level-ups.
    pub level_ups: u64,
    /// Players created.
    pub players_created: u64,
    /// Metadata write-throughs.
    pub metadata_updates: u64,
    /// Committed flushes.
    pub flushes_completed: u64,
    /// Rolled-back flushes.
    pub flush_failures: u64,
    /// Persisted queue entries.
    pub mutations_flushed: u64,
    /// Discarded queue entries.
    pub mutations_dropped: u64,
    /// Storage errors.
    pub storage_errors: u64,
    /// Last flush duration (µs).
    pub last_flush_micros: u64,
}

impl CounterSnapshot {
    fn series(&self) -> [(&'static str, &'static str, &'static str, u64); 12] {
        [
            ("levelz_messages_seen_total", "counter", "Messages offered to the engine", self.messages_seen),
            ("levelz_awards_granted_total", "counter", "Experience awards granted", self.awards_granted),
            ("levelz_awards_throttled_total", "counter", "Awards refused by the rate limiter", self.awards_throttled),
            ("levelz_level_ups_total", "counter", "Level-ups observed", self.level_ups),
            ("levelz_players_created_total", "counter", "Player records created", self.players_created),
            ("levelz_metadata_updates_total", "counter", "Player metadata write-throughs", self.metadata_updates),
            ("levelz_flushes_completed_total", "counter", "Batch flushes committed", self.flushes_completed),
            ("levelz_flush_failures_total", "counter", "Batch flushes rolled back", self.flush_failures),
            ("levelz_mutations_flushed_total", "counter", "Queued awards persisted", self.mutations_flushed),
            ("levelz_mutations_dropped_total", "counter", "Queued awards discarded", self.mutations_dropped),
            ("levelz_storage_errors_total", "counter", "Storage errors handled", self.storage_errors),
            ("levelz_last_flush_microseconds", "gauge", "Duration of the last flush", self.last_flush_micros),
        ]
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, kind, help, value) in self.series() {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }

    /// Serialize as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// Handling one chat message.
    pub const ON_MESSAGE: &str = "levelz::message";
    /// Cache-miss load of a player.
    pub const PLAYER_LOAD: &str = "levelz::player::load";
    /// Batch flush.
    pub const FLUSH: &str = "levelz::flush";
    /// Leaderboard snapshot rebuild.
    pub const LEADERBOARD_REBUILD: &str = "levelz::leaderboard::rebuild";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_default_zero() {
        let c = LevelzCounters::new();
        assert_eq!(c.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn counters_increment_and_snapshot() {
        let c = LevelzCounters::new();
        LevelzCounters::bump(&c.awards_granted);
        LevelzCounters::bump(&c.awards_granted);
        c.mutations_flushed.fetch_add(7, Ordering::Relaxed);

        let snap = c.snapshot();
        assert_eq!(snap.awards_granted, 2);
        assert_eq!(snap.mutations_flushed, 7);
        assert_eq!(snap.flush_failures, 0);
    }

    #[test]
    fn prometheus_format_valid() {
        let c = LevelzCounters::new();
        c.level_ups.fetch_add(42, Ordering::Relaxed);
        let prom = c.snapshot().to_prometheus();
        assert!(prom.contains("levelz_level_ups_total 42"));
        assert!(prom.contains("# TYPE levelz_last_flush_microseconds gauge"));
        assert!(prom.contains("# HELP"));
    }

    #[test]
    fn json_export_names_fields() {
        let c = LevelzCounters::new();
        LevelzCounters::bump(&c.players_created);
        let json: serde_json::Value = serde_json::from_str(&c.snapshot().to_json()).expect("json");
        assert_eq!(json["players_created"], 1);
    }
}
