//! Configuration for the levelz experience engine.
//!
//! Maps directly to the `[levelz]` tables of `levelz.toml`. Every window and
//! TTL is a fixed constant at runtime; none of them adapt to load.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level levelz configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelzConfig {
    /// Player record cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Award cooldown settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Batched write-back settings.
    #[serde(default)]
    pub flush: FlushConfig,
    /// Leaderboard snapshot settings.
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    /// SQLite settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Per-message reward tuning.
    #[serde(default)]
    pub rewards: RewardConfig,
}

impl LevelzConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `LevelzError::Config` if the TOML is invalid or the values
    /// are inconsistent.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| crate::LevelzError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values that would break the engine's invariants.
    ///
    /// # Errors
    /// Returns `LevelzError::Config` describing the first bad value.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.rewards.min_amount > self.rewards.max_amount {
            return Err(crate::LevelzError::Config(format!(
                "rewards.min_amount ({}) exceeds rewards.max_amount ({})",
                self.rewards.min_amount, self.rewards.max_amount
            )));
        }
        if self.rewards.min_amount < 0 {
            return Err(crate::LevelzError::Config(
                "rewards.min_amount must not be negative".to_string(),
            ));
        }
        if self.flush.interval_seconds == 0 {
            return Err(crate::LevelzError::Config(
                "flush.interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.leaderboard.page_size == 0 {
            return Err(crate::LevelzError::Config(
                "leaderboard.page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Read-through player cache. Entries expire on whichever limit hits first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Evict an entry not read for this many seconds.
    #[serde(default = "default_120")]
    pub idle_ttl_seconds: u64,
    /// Evict an entry this many seconds after it was loaded.
    #[serde(default = "default_300")]
    pub max_ttl_seconds: u64,
    /// Upper bound on cached players (least recently used goes first).
    #[serde(default = "default_100_000")]
    pub max_players: usize,
}

impl CacheConfig {
    /// Idle expiry as a [`Duration`].
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_seconds)
    }

    /// Absolute expiry as a [`Duration`].
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_ttl_seconds: 120,
            max_ttl_seconds: 300,
            max_players: 100_000,
        }
    }
}

/// Award cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// At most one reward per (guild, user) inside this window.
    #[serde(default = "default_60")]
    pub window_seconds: u64,
}

impl RateLimitConfig {
    /// Cooldown window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_seconds: 60 }
    }
}

/// Periodic batched flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Seconds between flushes.
    #[serde(default = "default_60")]
    pub interval_seconds: u64,
    /// Flush whatever is still queued when the flush task shuts down.
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

impl FlushConfig {
    /// Flush period as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            flush_on_shutdown: true,
        }
    }
}

/// Leaderboard snapshot cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Seconds a guild's snapshot is served before it is rebuilt.
    #[serde(default = "default_60")]
    pub ttl_seconds: u64,
    /// Upper bound on cached guild snapshots.
    #[serde(default = "default_1000")]
    pub max_guilds: usize,
    /// Rows per leaderboard page.
    #[serde(default = "default_10")]
    pub page_size: usize,
}

impl LeaderboardConfig {
    /// Snapshot lifetime as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            max_guilds: 1000,
            page_size: 10,
        }
    }
}

/// SQLite configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode so rank queries don't block the flush.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Milliseconds SQLite waits on a locked database.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

/// Per-message reward amounts (inclusive range).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Smallest amount awarded for a message.
    #[serde(default = "default_10_i64")]
    pub min_amount: i64,
    /// Largest amount awarded for a message.
    #[serde(default = "default_14_i64")]
    pub max_amount: i64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            min_amount: 10,
            max_amount: 14,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_10() -> usize {
    10
}

fn default_10_i64() -> i64 {
    10
}

fn default_14_i64() -> i64 {
    14
}

fn default_60() -> u64 {
    60
}

fn default_120() -> u64 {
    120
}

fn default_300() -> u64 {
    300
}

fn default_1000() -> usize {
    1000
}

fn default_5000() -> u64 {
    5000
}

fn default_100_000() -> usize {
    100_000
}
