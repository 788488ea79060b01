//! Rank and leaderboard resolution.
//!
//! Each guild's full ordering is loaded once, kept in the shared
//! [`TtlCache`] for a short TTL and scanned linearly for rank lookups.
//! Ranks therefore lag live experience by up to one TTL plus one flush
//! interval.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{Cache, TtlCache};
use crate::config::LeaderboardConfig;
use crate::single_flight::SingleFlight;
use crate::storage::PlayerStorage;
use crate::types::{EXPERIENCE_FLOOR, GuildId, UserId};

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// The player.
    pub user_id: UserId,
    /// Username as persisted.
    pub username: String,
    /// Discriminator as persisted.
    pub discriminator: String,
    /// Stored experience (floor included).
    pub experience: i64,
}

impl LeaderboardEntry {
    /// Experience as shown to users.
    #[must_use]
    pub fn display_experience(&self) -> i64 {
        (self.experience - EXPERIENCE_FLOOR).max(0)
    }
}

/// A guild's players ordered by experience, highest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderboardSnapshot {
    /// Rows in rank order.
    pub entries: Vec<LeaderboardEntry>,
}

impl LeaderboardSnapshot {
    /// 1-based position of `user_id`, or [`Rank::Unranked`].
    #[must_use]
    pub fn rank_of(&self, user_id: UserId) -> Rank {
        self.entries
            .iter()
            .position(|e| e.user_id == user_id)
            .map_or(Rank::Unranked, |i| Rank::Ranked(i + 1))
    }

    /// Number of ranked players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is ranked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A player's position on a guild leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    /// 1-based position.
    Ranked(usize),
    /// Not on the (possibly stale) leaderboard.
    Unranked,
}

impl Rank {
    /// The position, if ranked.
    #[must_use]
    pub fn position(self) -> Option<usize> {
        match self {
            Self::Ranked(n) => Some(n),
            Self::Unranked => None,
        }
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ranked(n) => write!(f, "{n}"),
            Self::Unranked => write!(f, "Unranked"),
        }
    }
}

/// One page of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardPage {
    /// 1-based page number actually served (clamped into range).
    pub page: usize,
    /// Total pages.
    pub total_pages: usize,
    /// `(rank, entry)` rows on this page.
    pub rows: Vec<(usize, LeaderboardEntry)>,
}

/// Answers rank and top-N queries from cached per-guild snapshots.
pub struct RankResolver {
    storage: Arc<dyn PlayerStorage>,
    snapshots: TtlCache<GuildId, Arc<LeaderboardSnapshot>>,
    rebuilds: SingleFlight<GuildId, Option<Arc<LeaderboardSnapshot>>>,
}

impl std::fmt::Debug for RankResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankResolver")
            .field("cached_guilds", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl RankResolver {
    /// Create a resolver reading from `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn PlayerStorage>, config: &LeaderboardConfig) -> Self {
        Self {
            storage,
            snapshots: TtlCache::new(config.max_guilds, config.ttl()),
            rebuilds: SingleFlight::new(),
        }
    }

    /// The cached snapshot for a guild, rebuilt if expired.
    ///
    /// Returns `None` when the rebuild query fails; the failure is logged.
    #[must_use]
    pub fn snapshot(&self, guild_id: GuildId) -> Option<Arc<LeaderboardSnapshot>> {
        if let Some(snapshot) = self.snapshots.get(&guild_id) {
            return Some(snapshot);
        }

        self.rebuilds.run(&guild_id, || {
            if let Some(snapshot) = self.snapshots.get(&guild_id) {
                return Some(snapshot);
            }
            match self.storage.select_leaderboard(guild_id) {
                Ok(entries) => {
                    debug!(guild = %guild_id, players = entries.len(), "Rebuilt leaderboard snapshot");
                    let snapshot = Arc::new(LeaderboardSnapshot { entries });
                    self.snapshots.put(guild_id, Arc::clone(&snapshot));
                    Some(snapshot)
                }
                Err(e) => {
                    warn!(guild = %guild_id, error = %e, "Failed to load leaderboard");
                    None
                }
            }
        })
    }

    /// A user's rank in a guild; storage failures yield [`Rank::Unranked`].
    #[must_use]
    pub fn rank_of(&self, guild_id: GuildId, user_id: UserId) -> Rank {
        self.snapshot(guild_id)
            .map_or(Rank::Unranked, |s| s.rank_of(user_id))
    }

    /// A user's rank from the cached snapshot only. Never touches storage;
    /// an expired or missing snapshot yields [`Rank::Unranked`].
    #[must_use]
    pub fn cached_rank_of(&self, guild_id: GuildId, user_id: UserId) -> Rank {
        self.snapshots
            .get(&guild_id)
            .map_or(Rank::Unranked, |s| s.rank_of(user_id))
    }

    /// The first `n` rows of a guild's leaderboard.
    #[must_use]
    pub fn top_n(&self, guild_id: GuildId, n: usize) -> Vec<LeaderboardEntry> {
        self.snapshot(guild_id)
            .map(|s| s.entries.iter().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// A 1-based page of `per_page` rows; out-of-range pages clamp to the
    /// nearest valid page.
    #[must_use]
    pub fn page(&self, guild_id: GuildId, page: usize, per_page: usize) -> LeaderboardPage {
        let per_page = per_page.max(1);
        let entries = self
            .snapshot(guild_id)
            .map(|s| s.entries.clone())
            .unwrap_or_default();

        let total_pages = entries.len().div_ceil(per_page).max(1);
        let page = page.clamp(1, total_pages);
        let start = (page - 1) * per_page;
        let rows = entries
            .into_iter()
            .enumerate()
            .skip(start)
            .take(per_page)
            .map(|(i, e)| (i + 1, e))
            .collect();

        LeaderboardPage {
            page,
            total_pages,
            rows,
        }
    }

    /// A user's persisted experience summed across guilds, floors excluded.
    ///
    /// Reads storage directly; failures are logged and read as 0.
    #[must_use]
    pub fn global_experience(&self, user_id: UserId) -> i64 {
        self.storage.global_experience(user_id).unwrap_or_else(|e| {
            warn!(user = %user_id, error = %e, "Failed to load global experience");
            0
        })
    }

    /// Drop a guild's snapshot so the next query rebuilds it.
    pub fn invalidate(&self, guild_id: GuildId) {
        self.snapshots.invalidate(&guild_id);
    }

    /// Drop expired snapshots.
    pub fn purge_expired(&self) -> usize {
        self.snapshots.purge_expired()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExperienceUpdate, SqliteStorage};
    use crate::types::{PlayerKey, PlayerRecord, UserProfile};
    use std::time::Duration;

    fn seeded(players: &[(u64, i64)]) -> Arc<SqliteStorage> {
        let storage = SqliteStorage::open_in_memory().expect("open");
        for &(user, bonus) in players {
            let profile = UserProfile::new(UserId(user), format!("user{user}"), "0001");
            storage
                .insert_player(&PlayerRecord::new(GuildId(1), &profile))
                .expect("insert");
            storage
                .batch_add_experience(&[ExperienceUpdate {
                    key: PlayerKey::new(GuildId(1), UserId(user)),
                    amount: bonus,
                }])
                .expect("batch");
        }
        Arc::new(storage)
    }

    #[test]
    fn rank_and_top_n() {
        let storage = seeded(&[(1, 10), (2, 300), (3, 50)]);
        let resolver = RankResolver::new(storage, &LeaderboardConfig::default());

        assert_eq!(resolver.rank_of(GuildId(1), UserId(2)), Rank::Ranked(1));
        assert_eq!(resolver.rank_of(GuildId(1), UserId(3)), Rank::Ranked(2));
        assert_eq!(resolver.rank_of(GuildId(1), UserId(1)), Rank::Ranked(3));
        assert_eq!(resolver.rank_of(GuildId(1), UserId(42)), Rank::Unranked);

        let top = resolver.top_n(GuildId(1), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, UserId(2));
        assert_eq!(top[0].display_experience(), 300);
        assert_eq!(resolver.global_experience(UserId(2)), 300);
        assert_eq!(resolver.global_experience(UserId(42)), 0);
    }

    #[test]
    fn snapshot_is_cached_until_ttl() {
        let storage = seeded(&[(1, 10)]);
        let config = LeaderboardConfig {
            ttl_seconds: 3600,
            ..LeaderboardConfig::default()
        };
        let resolver = RankResolver::new(Arc::clone(&storage) as Arc<dyn PlayerStorage>, &config);
        assert_eq!(resolver.rank_of(GuildId(1), UserId(2)), Rank::Unranked);

        let profile = UserProfile::new(UserId(2), "late", "0001");
        storage
            .insert_player(&PlayerRecord::new(GuildId(1), &profile))
            .expect("insert");
        assert_eq!(
            resolver.rank_of(GuildId(1), UserId(2)),
            Rank::Unranked,
            "stale snapshot served inside TTL"
        );

        resolver.invalidate(GuildId(1));
        assert_eq!(resolver.rank_of(GuildId(1), UserId(2)), Rank::Ranked(2));
    }

    #[test]
    fn snapshot_rebuilds_after_expiry() {
        let storage = seeded(&[(1, 10)]);
        // A zero TTL resolver never serves a cached snapshot.
        let config = LeaderboardConfig {
            ttl_seconds: 0,
            ..LeaderboardConfig::default()
        };
        let eager = RankResolver::new(Arc::clone(&storage) as Arc<dyn PlayerStorage>, &config);
        let _ = eager.snapshot(GuildId(1));
        let profile = UserProfile::new(UserId(5), "new", "0001");
        storage
            .insert_player(&PlayerRecord::new(GuildId(1), &profile))
            .expect("insert");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(eager.snapshot(GuildId(1)).expect("snapshot").len(), 2);
    }

    #[test]
    fn pagination_clamps() {
        let players: Vec<(u64, i64)> = (1..=25i64).map(|u| (u.unsigned_abs(), u * 10)).collect();
        let resolver = RankResolver::new(seeded(&players), &LeaderboardConfig::default());

        let page = resolver.page(GuildId(1), 2, 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.rows.len(), 10);
        assert_eq!(page.rows[0].0, 11);

        let last = resolver.page(GuildId(1), 99, 10);
        assert_eq!(last.page, 3);
        assert_eq!(last.rows.len(), 5);

        let empty = resolver.page(GuildId(404), 1, 10);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.rows.is_empty());
    }

    #[test]
    fn rank_display() {
        assert_eq!(Rank::Ranked(3).to_string(), "3");
        assert_eq!(Rank::Unranked.to_string(), "Unranked");
        assert_eq!(Rank::Ranked(3).position(), Some(3));
    }
}
