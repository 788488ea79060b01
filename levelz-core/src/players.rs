//! Read-through player record store.
//!
//! Records are cached per (guild, user) for a short idle window and a
//! longer absolute lifetime. A miss loads the row from storage, creating it
//! at the experience floor on first sight; concurrent misses for one key
//! share a single load. Experience is never written back from here: awards
//! mutate the cached record and go through the experience queue.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{Cache, TtlCache};
use crate::config::CacheConfig;
use crate::error::{LevelzError, Result};
use crate::metrics::{LevelzCounters, spans};
use crate::queue::ExperienceQueue;
use crate::single_flight::SingleFlight;
use crate::storage::PlayerStorage;
use crate::types::{GuildId, PlayerKey, PlayerRecord, UserProfile};

/// Loads retried when flushes keep landing between the storage read and
/// the queue read.
const MAX_LOAD_ATTEMPTS: u32 = 5;

/// A cached record shared between every in-flight message for one player.
pub type SharedPlayer = Arc<Mutex<PlayerRecord>>;

/// Cache of live player records in front of [`PlayerStorage`].
pub struct PlayerStore {
    storage: Arc<dyn PlayerStorage>,
    cache: TtlCache<PlayerKey, SharedPlayer>,
    loads: SingleFlight<PlayerKey, std::result::Result<SharedPlayer, String>>,
    queue: ExperienceQueue,
    counters: Arc<LevelzCounters>,
}

impl std::fmt::Debug for PlayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerStore")
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl PlayerStore {
    /// Create a store. `queue` is consulted when a record is reloaded so
    /// unflushed awards are not lost from the cached view.
    #[must_use]
    pub fn new(
        storage: Arc<dyn PlayerStorage>,
        config: &CacheConfig,
        queue: ExperienceQueue,
        counters: Arc<LevelzCounters>,
    ) -> Self {
        Self {
            storage,
            cache: TtlCache::with_idle(config.max_players, config.max_ttl(), Some(config.idle_ttl())),
            loads: SingleFlight::new(),
            queue,
            counters,
        }
    }

    /// The cached record for `profile` in `guild_id`, loading or creating it
    /// on a miss.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the row could not be read or created.
    /// Callers waiting on another caller's load get
    /// [`LevelzError::Storage`] carrying the leader's message.
    pub fn get(&self, guild_id: GuildId, profile: &UserProfile) -> Result<SharedPlayer> {
        let key = PlayerKey::new(guild_id, profile.user_id);
        if let Some(player) = self.cache.get(&key) {
            player.lock().last_seen = Utc::now();
            return Ok(player);
        }

        self.loads
            .run(&key, || {
                if let Some(player) = self.cache.get(&key) {
                    return Ok(player);
                }
                let record = self.load(key, profile).map_err(|e| {
                    LevelzCounters::bump(&self.counters.storage_errors);
                    warn!(player = %key, error = %e, "Failed to load player");
                    e.to_string()
                })?;
                let player = Arc::new(Mutex::new(record));
                self.cache.put(key, Arc::clone(&player));
                Ok(player)
            })
            .map_err(LevelzError::Storage)
    }

    fn load(&self, key: PlayerKey, profile: &UserProfile) -> Result<PlayerRecord> {
        let _span = tracing::debug_span!(spans::PLAYER_LOAD, player = %key).entered();

        let mut attempt = 1;
        loop {
            let generation = self.queue.wait_for_idle();

            let Some(mut record) = self.storage.select_player(key)? else {
                return self.create(key, profile);
            };

            // A batch that left the queue after the select may or may not be
            // in the row; read both again.
            let (pending, after) = self.queue.pending_with_generation(key);
            if after != generation && attempt < MAX_LOAD_ATTEMPTS {
                debug!(player = %key, attempt, "Flush overlapped player load, retrying");
                attempt += 1;
                continue;
            }
            if after != generation {
                warn!(player = %key, attempts = attempt, "Flushes kept overlapping player load");
            }

            if pending != 0 {
                debug!(player = %key, pending, "Re-applying unflushed experience");
                record.add_experience(pending);
            }
            return self.finish_load(record, profile);
        }
    }

    fn create(&self, key: PlayerKey, profile: &UserProfile) -> Result<PlayerRecord> {
        let record = PlayerRecord::new(key.guild_id, profile);
        if self.storage.insert_player(&record)? {
            LevelzCounters::bump(&self.counters.players_created);
            info!(player = %key, "Created player record");
            return Ok(record);
        }
        // Someone else created the row between our select and insert.
        self.storage.select_player(key)?.map_or_else(
            || Err(LevelzError::Storage(format!("player {key} vanished after insert"))),
            |existing| self.finish_load(existing, profile),
        )
    }

    fn finish_load(&self, mut record: PlayerRecord, profile: &UserProfile) -> Result<PlayerRecord> {
        if record.metadata_differs(profile) {
            record.apply_metadata(profile);
            match self.storage.update_player_metadata(profile.user_id, profile) {
                Ok(rows) => {
                    LevelzCounters::bump(&self.counters.metadata_updates);
                    debug!(user = %profile.user_id, rows, "Updated player metadata");
                }
                Err(e) => {
                    LevelzCounters::bump(&self.counters.storage_errors);
                    warn!(user = %profile.user_id, error = %e, "Failed to update player metadata");
                }
            }
        }
        record.last_seen = Utc::now();
        Ok(record)
    }

    /// The cached record for `key`, if live. Never touches storage.
    #[must_use]
    pub fn peek(&self, key: PlayerKey) -> Option<SharedPlayer> {
        self.cache.get(&key)
    }

    /// Evict `key`; the next [`get`](Self::get) reloads from storage.
    pub fn invalidate(&self, key: PlayerKey) -> Option<SharedPlayer> {
        self.cache.invalidate(&key)
    }

    /// Number of cached records, expired-but-unpurged ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop expired records.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExperienceUpdate, SqliteStorage};
    use crate::types::UserId;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_over(storage: Arc<dyn PlayerStorage>, queue: ExperienceQueue) -> PlayerStore {
        PlayerStore::new(storage, &CacheConfig::default(), queue, Arc::new(LevelzCounters::new()))
    }

    #[test]
    fn first_sight_creates_row_at_floor() {
        let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        let store = store_over(Arc::clone(&storage) as Arc<dyn PlayerStorage>, ExperienceQueue::new());
        let profile = UserProfile::new(UserId(1), "new", "0001");

        let player = store.get(GuildId(1), &profile).expect("get");
        assert_eq!(player.lock().experience, 100);

        let row = storage
            .select_player(PlayerKey::new(GuildId(1), UserId(1)))
            .expect("select")
            .expect("row");
        assert_eq!(row.experience, 100);
        assert_eq!(store.counters.snapshot().players_created, 1);
    }

    #[test]
    fn cache_hit_returns_same_record() {
        let storage: Arc<dyn PlayerStorage> = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        let store = store_over(storage, ExperienceQueue::new());
        let profile = UserProfile::new(UserId(1), "new", "0001");

        let a = store.get(GuildId(1), &profile).expect("get");
        a.lock().add_experience(50);
        let b = store.get(GuildId(1), &profile).expect("get");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().experience, 150);
    }

    #[test]
    fn changed_metadata_is_written_through() {
        let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        let old = UserProfile::new(UserId(1), "old", "0001");
        storage
            .insert_player(&PlayerRecord::new(GuildId(1), &old))
            .expect("insert");
        storage
            .insert_player(&PlayerRecord::new(GuildId(2), &old))
            .expect("insert");

        let store = store_over(Arc::clone(&storage) as Arc<dyn PlayerStorage>, ExperienceQueue::new());
        let renamed = UserProfile::new(UserId(1), "renamed", "0002").with_avatar("abc");
        let player = store.get(GuildId(1), &renamed).expect("get");
        assert_eq!(player.lock().username, "renamed");

        let other_guild = storage
            .select_player(PlayerKey::new(GuildId(2), UserId(1)))
            .expect("select")
            .expect("row");
        assert_eq!(other_guild.username, "renamed");
        assert_eq!(other_guild.avatar.as_deref(), Some("abc"));
    }

    #[test]
    fn reload_reapplies_pending_experience() {
        let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        let queue = ExperienceQueue::new();
        let store = store_over(Arc::clone(&storage) as Arc<dyn PlayerStorage>, queue.clone());
        let profile = UserProfile::new(UserId(1), "p", "0001");
        let key = PlayerKey::new(GuildId(1), UserId(1));

        let player = store.get(GuildId(1), &profile).expect("get");
        player.lock().add_experience(12);
        queue.enqueue(UserId(1), GuildId(1), 12);

        store.invalidate(key);
        let reloaded = store.get(GuildId(1), &profile).expect("get");
        assert_eq!(reloaded.lock().experience, 112);

        // After a flush the row carries the delta and the queue is empty.
        storage
            .batch_add_experience(&[ExperienceUpdate { key, amount: queue.pending_for(key) }])
            .expect("flush");
        let _ = queue.drain();
        store.invalidate(key);
        assert_eq!(store.get(GuildId(1), &profile).expect("get").lock().experience, 112);
    }

    struct CountingStorage {
        inner: SqliteStorage,
        selects: AtomicUsize,
    }

    impl PlayerStorage for CountingStorage {
        fn select_player(&self, key: PlayerKey) -> Result<Option<PlayerRecord>> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.select_player(key)
        }
        fn insert_player(&self, record: &PlayerRecord) -> Result<bool> {
            self.inner.insert_player(record)
        }
        fn update_player_metadata(&self, user_id: UserId, profile: &UserProfile) -> Result<usize> {
            self.inner.update_player_metadata(user_id, profile)
        }
        fn batch_add_experience(&self, updates: &[ExperienceUpdate]) -> Result<usize> {
            self.inner.batch_add_experience(updates)
        }
        fn select_leaderboard(&self, guild_id: GuildId) -> Result<Vec<crate::leaderboard::LeaderboardEntry>> {
            self.inner.select_leaderboard(guild_id)
        }
        fn global_experience(&self, user_id: UserId) -> Result<i64> {
            self.inner.global_experience(user_id)
        }
    }

    #[test]
    fn concurrent_misses_share_one_load() {
        let storage = Arc::new(CountingStorage {
            inner: SqliteStorage::open_in_memory().expect("open"),
            selects: AtomicUsize::new(0),
        });
        let store = Arc::new(store_over(
            Arc::clone(&storage) as Arc<dyn PlayerStorage>,
            ExperienceQueue::new(),
        ));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .get(GuildId(1), &UserProfile::new(UserId(1), "p", "0001"))
                        .expect("get")
                })
            })
            .collect();

        let players: Vec<SharedPlayer> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert!(players.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(storage.selects.load(Ordering::SeqCst), 1);
        assert_eq!(storage.inner.player_count().expect("count"), 1);
    }

    /// Storage whose first select races a flush: it reads the row, then
    /// lets the flusher commit the queued batch before returning.
    struct FlushAfterSelect {
        inner: Arc<SqliteStorage>,
        queue: ExperienceQueue,
        raced: std::sync::atomic::AtomicBool,
    }

    impl PlayerStorage for FlushAfterSelect {
        fn select_player(&self, key: PlayerKey) -> Result<Option<PlayerRecord>> {
            let row = self.inner.select_player(key)?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                let flusher = crate::flush::BatchFlusher::new(
                    Arc::clone(&self.inner) as Arc<dyn PlayerStorage>,
                    self.queue.clone(),
                    Arc::new(LevelzCounters::new()),
                );
                flusher.flush().expect("flush");
            }
            Ok(row)
        }
        fn insert_player(&self, record: &PlayerRecord) -> Result<bool> {
            self.inner.insert_player(record)
        }
        fn update_player_metadata(&self, user_id: UserId, profile: &UserProfile) -> Result<usize> {
            self.inner.update_player_metadata(user_id, profile)
        }
        fn batch_add_experience(&self, updates: &[ExperienceUpdate]) -> Result<usize> {
            self.inner.batch_add_experience(updates)
        }
        fn select_leaderboard(&self, guild_id: GuildId) -> Result<Vec<crate::leaderboard::LeaderboardEntry>> {
            self.inner.select_leaderboard(guild_id)
        }
        fn global_experience(&self, user_id: UserId) -> Result<i64> {
            self.inner.global_experience(user_id)
        }
    }

    #[test]
    fn reload_racing_a_flush_matches_storage() {
        let inner = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        let profile = UserProfile::new(UserId(1), "p", "0001");
        let key = PlayerKey::new(GuildId(1), UserId(1));
        inner
            .insert_player(&PlayerRecord::new(GuildId(1), &profile))
            .expect("insert");

        let queue = ExperienceQueue::new();
        queue.enqueue(UserId(1), GuildId(1), 500);
        let storage = Arc::new(FlushAfterSelect {
            inner: Arc::clone(&inner),
            queue: queue.clone(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let store = store_over(storage as Arc<dyn PlayerStorage>, queue.clone());

        let reloaded = store.get(GuildId(1), &profile).expect("get").lock().experience;
        let stored = inner.select_player(key).expect("select").expect("row").experience;
        assert_eq!(stored, 600);
        assert_eq!(reloaded, stored);
        assert!(queue.is_empty());
    }
}
