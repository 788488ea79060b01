//! The experience service: one object wiring the engine together.
//!
//! Built once at startup and shared behind an `Arc`. Message handlers call
//! [`ExperienceService::on_message`]; a background task calls
//! [`ExperienceService::flush`] on an interval.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{LevelzConfig, RewardConfig};
use crate::curve::{LevelInfo, effective_modifier, level_info};
use crate::error::Result;
use crate::flush::{BatchFlusher, FlushReport};
use crate::leaderboard::{LeaderboardEntry, LeaderboardPage, Rank, RankResolver};
use crate::leveling::{LevelOutcome, award, random_award_amount};
use crate::metrics::{LevelzCounters, spans};
use crate::players::{PlayerStore, SharedPlayer};
use crate::queue::ExperienceQueue;
use crate::rate_limit::AwardRateLimiter;
use crate::storage::PlayerStorage;
use crate::types::{GuildId, GuildLevelConfig, PlayerKey, PlayerRecord, UserId, UserProfile};

/// What handling one message did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardResult {
    /// Whether experience was awarded.
    pub awarded: bool,
    /// Whether the award crossed a level boundary.
    pub leveled_up: bool,
    /// The level reached, on a level-up.
    pub new_level: Option<u64>,
    /// Guild rank from the cached leaderboard, `Unranked` when none is
    /// cached; may trail live experience.
    pub rank: Rank,
    /// Stored experience after the message, when the player was loaded.
    pub total_experience: Option<i64>,
    /// Full outcome of the award, when one was made.
    pub outcome: Option<LevelOutcome>,
}

impl RewardResult {
    fn skipped() -> Self {
        Self {
            awarded: false,
            leveled_up: false,
            new_level: None,
            rank: Rank::Unranked,
            total_experience: None,
            outcome: None,
        }
    }
}

/// Everything a rank view shows about one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    /// The cached record.
    pub record: PlayerRecord,
    /// Position on the curve.
    pub level: LevelInfo,
    /// Cached guild rank.
    pub rank: Rank,
    /// Persisted experience across all guilds, floors excluded.
    pub global_experience: i64,
}

/// Owns the player store, award gate, queue, flusher and rank resolver.
pub struct ExperienceService {
    players: PlayerStore,
    limiter: AwardRateLimiter,
    queue: ExperienceQueue,
    flusher: BatchFlusher,
    ranks: RankResolver,
    counters: Arc<LevelzCounters>,
    rewards: RewardConfig,
    page_size: usize,
}

impl std::fmt::Debug for ExperienceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperienceService")
            .field("players", &self.players)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ExperienceService {
    /// Wire an engine on top of `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn PlayerStorage>, config: &LevelzConfig) -> Self {
        let counters = Arc::new(LevelzCounters::new());
        let queue = ExperienceQueue::new();
        Self {
            players: PlayerStore::new(
                Arc::clone(&storage),
                &config.cache,
                queue.clone(),
                Arc::clone(&counters),
            ),
            limiter: AwardRateLimiter::new(config.rate_limit.window()),
            flusher: BatchFlusher::new(Arc::clone(&storage), queue.clone(), Arc::clone(&counters)),
            ranks: RankResolver::new(storage, &config.leaderboard),
            queue,
            counters,
            rewards: config.rewards.clone(),
            page_size: config.leaderboard.page_size,
        }
    }

    /// Handle one guild message: gate, award a random amount, enqueue.
    pub fn on_message(
        &self,
        guild_id: GuildId,
        profile: &UserProfile,
        config: Option<&GuildLevelConfig>,
    ) -> RewardResult {
        let amount = random_award_amount(&mut rand::thread_rng(), &self.rewards);
        self.reward_fixed(guild_id, profile, config, amount)
    }

    /// [`on_message`](Self::on_message) with an explicit amount.
    pub fn reward_fixed(
        &self,
        guild_id: GuildId,
        profile: &UserProfile,
        config: Option<&GuildLevelConfig>,
        amount: i64,
    ) -> RewardResult {
        let _span = tracing::debug_span!(spans::ON_MESSAGE, guild = %guild_id, user = %profile.user_id)
            .entered();
        LevelzCounters::bump(&self.counters.messages_seen);

        match config {
            Some(c) if c.levels_enabled => {}
            _ => {
                debug!("Levels disabled for guild");
                return RewardResult::skipped();
            }
        }
        if profile.is_bot {
            return RewardResult::skipped();
        }

        let Ok(player) = self.players.get(guild_id, profile) else {
            return RewardResult::skipped();
        };

        if !self.limiter.try_consume(guild_id, profile.user_id) {
            LevelzCounters::bump(&self.counters.awards_throttled);
            let total = player.lock().experience;
            return RewardResult {
                total_experience: Some(total),
                rank: self.ranks.cached_rank_of(guild_id, profile.user_id),
                ..RewardResult::skipped()
            };
        }

        self.apply(guild_id, &player, config, amount)
    }

    /// Award `amount` without the rate limit, e.g. for admin grants or other
    /// producers. Negative amounts remove experience down to zero.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the player could not be loaded.
    pub fn give_experience(
        &self,
        guild_id: GuildId,
        profile: &UserProfile,
        config: Option<&GuildLevelConfig>,
        amount: i64,
    ) -> Result<RewardResult> {
        let player = self.players.get(guild_id, profile)?;
        Ok(self.apply(guild_id, &player, config, amount))
    }

    fn apply(
        &self,
        guild_id: GuildId,
        player: &SharedPlayer,
        config: Option<&GuildLevelConfig>,
        amount: i64,
    ) -> RewardResult {
        let (outcome, user_id) = {
            let mut record = player.lock();
            let before = record.experience;
            let outcome = award(config, &mut record, amount);
            let applied = record.experience - before;
            if applied != 0 {
                self.queue.enqueue(record.user_id, guild_id, applied);
            }
            (outcome, record.user_id)
        };

        LevelzCounters::bump(&self.counters.awards_granted);
        if outcome.leveled_up {
            LevelzCounters::bump(&self.counters.level_ups);
            info!(
                guild = %guild_id,
                user = %user_id,
                level = outcome.level_after,
                "Player leveled up"
            );
        }

        RewardResult {
            awarded: true,
            leveled_up: outcome.leveled_up,
            new_level: outcome.new_level,
            rank: self.ranks.cached_rank_of(guild_id, user_id),
            total_experience: Some(outcome.total_experience),
            outcome: Some(outcome),
        }
    }

    /// Record, level, rank and global experience for a rank view.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the player could not be loaded.
    pub fn player_snapshot(
        &self,
        guild_id: GuildId,
        profile: &UserProfile,
        config: Option<&GuildLevelConfig>,
    ) -> Result<PlayerSnapshot> {
        let record = self.players.get(guild_id, profile)?.lock().clone();
        Ok(PlayerSnapshot {
            level: level_info(record.experience, effective_modifier(config)),
            rank: self.ranks.rank_of(guild_id, record.user_id),
            global_experience: self.ranks.global_experience(record.user_id),
            record,
        })
    }

    /// Curve position of one player.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the player could not be loaded.
    pub fn level_info(
        &self,
        guild_id: GuildId,
        profile: &UserProfile,
        config: Option<&GuildLevelConfig>,
    ) -> Result<LevelInfo> {
        let experience = self.players.get(guild_id, profile)?.lock().experience;
        Ok(level_info(experience, effective_modifier(config)))
    }

    /// Cached guild rank.
    #[must_use]
    pub fn rank_of(&self, guild_id: GuildId, user_id: UserId) -> Rank {
        self.ranks.rank_of(guild_id, user_id)
    }

    /// Top `n` of a guild's cached leaderboard.
    #[must_use]
    pub fn top_n(&self, guild_id: GuildId, n: usize) -> Vec<LeaderboardEntry> {
        self.ranks.top_n(guild_id, n)
    }

    /// One page of a guild's leaderboard at the configured page size.
    #[must_use]
    pub fn page(&self, guild_id: GuildId, page: usize) -> LeaderboardPage {
        self.ranks.page(guild_id, page, self.page_size)
    }

    /// Persist the queue.
    ///
    /// # Errors
    ///
    /// See [`BatchFlusher::flush`].
    pub fn flush(&self) -> Result<FlushReport> {
        self.flusher.flush()
    }

    /// Drop expired cache entries and closed rate-limit windows.
    pub fn purge_expired(&self) -> usize {
        let purged = self.players.purge_expired()
            + self.limiter.purge_expired()
            + self.ranks.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired entries");
        }
        purged
    }

    /// Evict a cached player so the next message reloads it.
    pub fn invalidate_player(&self, guild_id: GuildId, user_id: UserId) {
        self.players.invalidate(PlayerKey::new(guild_id, user_id));
    }

    /// Drop a guild's cached leaderboard.
    pub fn invalidate_leaderboard(&self, guild_id: GuildId) {
        self.ranks.invalidate(guild_id);
    }

    /// Runtime counters.
    #[must_use]
    pub fn counters(&self) -> &LevelzCounters {
        &self.counters
    }

    /// The pending experience queue.
    #[must_use]
    pub fn queue(&self) -> &ExperienceQueue {
        &self.queue
    }

    /// The player record store.
    #[must_use]
    pub fn players(&self) -> &PlayerStore {
        &self.players
    }
}
