//! Persistent storage for player records.
//!
//! [`PlayerStorage`] is the seam between the engine and the relational
//! store; [`SqliteStorage`] implements it on a single SQLite database:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS players (
//!     guild_id      INTEGER NOT NULL,
//!     user_id       INTEGER NOT NULL,
//!     username      TEXT    NOT NULL,
//!     discriminator TEXT    NOT NULL,
//!     avatar        TEXT,
//!     experience    INTEGER NOT NULL DEFAULT 100,
//!     last_seen     TEXT    NOT NULL,
//!     PRIMARY KEY (guild_id, user_id)
//! );
//! ```
//!
//! - WAL mode so leaderboard reads don't stall behind the flush transaction.
//! - Inserts are idempotent (`ON CONFLICT DO NOTHING`), so a racing
//!   first-seen insert from another process is harmless.
//! - Experience is only ever written as an increment, which keeps concurrent
//!   admin corrections from being overwritten by a stale cached total.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::leaderboard::LeaderboardEntry;
use crate::types::{GuildId, PlayerKey, PlayerRecord, UserId, UserProfile};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS players (
        guild_id      INTEGER NOT NULL,
        user_id       INTEGER NOT NULL,
        username      TEXT    NOT NULL,
        discriminator TEXT    NOT NULL,
        avatar        TEXT,
        experience    INTEGER NOT NULL DEFAULT 100,
        last_seen     TEXT    NOT NULL,
        PRIMARY KEY (guild_id, user_id)
    );
    CREATE INDEX IF NOT EXISTS idx_players_guild_experience
        ON players (guild_id, experience DESC);
    CREATE INDEX IF NOT EXISTS idx_players_user
        ON players (user_id);
";

/// One aggregated experience increment for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceUpdate {
    /// Player to update.
    pub key: PlayerKey,
    /// Experience to add (may be negative for corrections).
    pub amount: i64,
}

/// Storage operations the engine needs.
///
/// Implementations must be safe to share between the message path (reads,
/// first-seen inserts, metadata write-through) and the flush task.
pub trait PlayerStorage: Send + Sync {
    /// Load one player row.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn select_player(&self, key: PlayerKey) -> Result<Option<PlayerRecord>>;

    /// Insert a first-seen player. Returns `false` if the row already existed.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    fn insert_player(&self, record: &PlayerRecord) -> Result<bool>;

    /// Write display metadata for a user across every guild they are in.
    /// Returns the number of rows touched.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    fn update_player_metadata(&self, user_id: UserId, profile: &UserProfile) -> Result<usize>;

    /// Apply every increment inside one transaction: all commit or none do.
    /// Returns the number of rows updated.
    ///
    /// # Errors
    /// Returns an error (after rolling back) if any statement fails.
    fn batch_add_experience(&self, updates: &[ExperienceUpdate]) -> Result<usize>;

    /// All players of a guild, highest experience first (ties by user id).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn select_leaderboard(&self, guild_id: GuildId) -> Result<Vec<LeaderboardEntry>>;

    /// A user's experience summed over every guild, floors excluded.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn global_experience(&self, user_id: UserId) -> Result<i64>;
}

// ---------------------------------------------------------------------------
// SqliteStorage
// ---------------------------------------------------------------------------

/// [`PlayerStorage`] backed by one SQLite connection.
///
/// # Usage
///
/// ```no_run
/// # use levelz_core::storage::{PlayerStorage, SqliteStorage};
/// # use levelz_core::config::PersistenceConfig;
/// # use levelz_core::types::{GuildId, PlayerKey, PlayerRecord, UserId, UserProfile};
/// let storage = SqliteStorage::open("levels.db", &PersistenceConfig::default())?;
/// let profile = UserProfile::new(UserId(1), "ava", "0001");
/// storage.insert_player(&PlayerRecord::new(GuildId(9), &profile))?;
/// let loaded = storage.select_player(PlayerKey::new(GuildId(9), UserId(1)))?;
/// # Ok::<(), levelz_core::error::LevelzError>(())
/// ```
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) a database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`LevelzError::Database`](crate::LevelzError::Database) on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "levelz storage opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`LevelzError::Database`](crate::LevelzError::Database) on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run arbitrary work on the connection, e.g. maintenance or admin
    /// corrections that bypass the engine.
    ///
    /// # Errors
    ///
    /// Propagates the closure's SQLite error.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    /// Total number of player rows.
    ///
    /// # Errors
    ///
    /// Returns [`LevelzError::Database`](crate::LevelzError::Database) on SQLite failures.
    pub fn player_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Snowflakes are stored bit-for-bit in SQLite's signed 64-bit integers.
fn sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

fn parse_last_seen(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(
        |e| {
            warn!(value = raw, error = %e, "Unparseable last_seen, using now");
            Utc::now()
        },
        |t| t.with_timezone(&Utc),
    )
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerRecord> {
    let last_seen: String = row.get(6)?;
    Ok(PlayerRecord {
        guild_id: GuildId(from_sql_id(row.get(0)?)),
        user_id: UserId(from_sql_id(row.get(1)?)),
        username: row.get(2)?,
        discriminator: row.get(3)?,
        avatar: row.get(4)?,
        experience: row.get(5)?,
        last_seen: parse_last_seen(&last_seen),
    })
}

impl PlayerStorage for SqliteStorage {
    fn select_player(&self, key: PlayerKey) -> Result<Option<PlayerRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT guild_id, user_id, username, discriminator, avatar, experience, last_seen
             FROM players WHERE guild_id = ?1 AND user_id = ?2",
        )?;
        let record = stmt
            .query_row(params![sql_id(key.guild_id.0), sql_id(key.user_id.0)], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn insert_player(&self, record: &PlayerRecord) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO players (guild_id, user_id, username, discriminator, avatar, experience, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(guild_id, user_id) DO NOTHING",
            params![
                sql_id(record.guild_id.0),
                sql_id(record.user_id.0),
                record.username,
                record.discriminator,
                record.avatar,
                record.experience,
                record.last_seen.to_rfc3339(),
            ],
        )?;
        debug!(player = %record.key(), inserted = inserted > 0, "Inserted player");
        Ok(inserted > 0)
    }

    fn update_player_metadata(&self, user_id: UserId, profile: &UserProfile) -> Result<usize> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE players SET username = ?1, discriminator = ?2, avatar = ?3 WHERE user_id = ?4",
            params![
                profile.username,
                profile.discriminator,
                profile.avatar,
                sql_id(user_id.0)
            ],
        )?;
        debug!(user = %user_id, rows = updated, "Updated player metadata");
        Ok(updated)
    }

    fn batch_add_experience(&self, updates: &[ExperienceUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();

        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE players
                 SET experience = MAX(experience + ?1, 0), last_seen = ?2
                 WHERE guild_id = ?3 AND user_id = ?4",
            )?;
            for update in updates {
                updated += stmt.execute(params![
                    update.amount,
                    now,
                    sql_id(update.key.guild_id.0),
                    sql_id(update.key.user_id.0)
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            players = updates.len(),
            rows = updated,
            elapsed_us = start.elapsed().as_micros(),
            "Committed experience batch"
        );
        Ok(updated)
    }

    fn select_leaderboard(&self, guild_id: GuildId) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, username, discriminator, experience
             FROM players WHERE guild_id = ?1
             ORDER BY experience DESC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![sql_id(guild_id.0)], |row| {
            Ok(LeaderboardEntry {
                user_id: UserId(from_sql_id(row.get(0)?)),
                username: row.get(1)?,
                discriminator: row.get(2)?,
                experience: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn global_experience(&self, user_id: UserId) -> Result<i64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(experience) - COUNT(user_id) * 100, 0) FROM players WHERE user_id = ?1",
            params![sql_id(user_id.0)],
            |row| row.get(0),
        )?;
        Ok(total.max(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
