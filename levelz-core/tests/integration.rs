//! Integration tests: end-to-end experience flows.
//!
//! Message → gate → award → queue → flush → rank, over in-memory and
//! file-backed SQLite.

use std::collections::BTreeMap;
use std::sync::Arc;

use levelz_core::config::LevelzConfig;
use levelz_core::curve::{DEFAULT_MODIFIER, level_of, stored_experience_for_level};
use levelz_core::leveling::{AlertTemplate, plan_roles};
use levelz_core::queue::ExperienceQueue;
use levelz_core::storage::{PlayerStorage, SqliteStorage};
use levelz_core::{
    ExperienceService, GuildId, GuildLevelConfig, LevelzError, PlayerKey, Rank, RoleId, UserId,
    UserProfile,
};

fn service_over(storage: &Arc<SqliteStorage>) -> ExperienceService {
    ExperienceService::new(
        Arc::clone(storage) as Arc<dyn PlayerStorage>,
        &LevelzConfig::default(),
    )
}

fn profile(id: u64) -> UserProfile {
    UserProfile::new(UserId(id), format!("user{id}"), "0001")
}

fn stored_experience(storage: &SqliteStorage, guild: u64, user: u64) -> i64 {
    storage
        .select_player(PlayerKey::new(GuildId(guild), UserId(user)))
        .expect("select")
        .expect("row")
        .experience
}

// ---------------------------------------------------------------------------
// New player, first message
// ---------------------------------------------------------------------------

#[test]
fn new_player_first_message() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = service_over(&storage);
    let config = GuildLevelConfig::default();

    let result = service.reward_fixed(GuildId(1), &profile(1), Some(&config), 12);

    assert!(result.awarded);
    assert!(!result.leveled_up);
    let outcome = result.outcome.expect("outcome");
    assert_eq!(outcome.level_before, 0);
    assert_eq!(outcome.level_after, 0);
    assert!(outcome.roles.is_empty());

    // The row exists at the floor; the award waits in the queue.
    assert_eq!(stored_experience(&storage, 1, 1), 100);
    assert_eq!(service.queue().len(), 1);
}

// ---------------------------------------------------------------------------
// Crossing into level 5 with a mapped role
// ---------------------------------------------------------------------------

#[test]
fn level_up_grants_role_and_queues_alert() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = service_over(&storage);
    let config = GuildLevelConfig {
        level_alerts_enabled: true,
        level_roles: BTreeMap::from([(5, RoleId(555))]),
        ..GuildLevelConfig::default()
    };

    let boundary = stored_experience_for_level(5, DEFAULT_MODIFIER);
    let player = profile(2);
    service
        .give_experience(GuildId(1), &player, Some(&config), boundary - 5 - 100)
        .expect("seed");
    assert_eq!(level_of(boundary - 5, DEFAULT_MODIFIER), 4);

    let result = service.reward_fixed(GuildId(1), &player, Some(&config), 12);
    assert!(result.leveled_up);
    assert_eq!(result.new_level, Some(5));

    let outcome = result.outcome.expect("outcome");
    assert_eq!(outcome.roles.grant, vec![RoleId(555)]);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.level, 5);
    assert_eq!(alert.template, AlertTemplate::RoleReward { role_id: RoleId(555) });
    // Seeding to level 4 counted as level-ups too.
    assert_eq!(service.counters().snapshot().level_ups, 2);
}

#[test]
fn hierarchy_at_level_twelve() {
    let roles = BTreeMap::from([(5, RoleId(1)), (10, RoleId(2)), (15, RoleId(3))]);
    let plan = plan_roles(&roles, 12, true);
    assert_eq!(plan.grant, vec![RoleId(1), RoleId(2)]);
    assert_eq!(plan.retained, Some(RoleId(2)));
    assert_eq!(plan.revoke, vec![RoleId(1)]);
}

// ---------------------------------------------------------------------------
// Write-back
// ---------------------------------------------------------------------------

#[test]
fn flush_persists_awards_and_updates_rank() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = service_over(&storage);
    let config = GuildLevelConfig::default();

    for (user, amount) in [(1, 10), (2, 14), (3, 12)] {
        let _ = service.reward_fixed(GuildId(1), &profile(user), Some(&config), amount);
    }
    // The snapshot was built on the first message and is still cached.
    assert_eq!(service.top_n(GuildId(1), 3).len(), 1);

    let report = service.flush().expect("flush");
    assert_eq!(report.entries, 3);
    assert_eq!(stored_experience(&storage, 1, 2), 114);

    service.invalidate_leaderboard(GuildId(1));
    assert_eq!(service.rank_of(GuildId(1), UserId(2)), Rank::Ranked(1));
    assert_eq!(service.rank_of(GuildId(1), UserId(3)), Rank::Ranked(2));
    assert_eq!(service.rank_of(GuildId(1), UserId(1)), Rank::Ranked(3));
    assert_eq!(service.rank_of(GuildId(1), UserId(9)), Rank::Unranked);
}

#[test]
fn failed_flush_drops_batch_but_cache_keeps_award() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = service_over(&storage);
    let config = GuildLevelConfig::default();

    let _ = service.reward_fixed(GuildId(1), &profile(7), Some(&config), 12);
    storage
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_all BEFORE UPDATE OF experience ON players
                 BEGIN SELECT RAISE(ABORT, 'disk on fire'); END;",
            )
        })
        .expect("trigger");

    let err = service.flush().expect_err("flush must fail");
    assert!(matches!(err, LevelzError::FlushFailed { entries: 1, .. }));
    assert!(service.queue().is_empty());
    assert_eq!(stored_experience(&storage, 1, 7), 100);

    let cached = service.level_info(GuildId(1), &profile(7), Some(&config)).expect("info");
    assert_eq!(cached.display_experience, 12, "cache keeps the unpersisted award");
    assert_eq!(service.counters().snapshot().mutations_dropped, 1);
}

#[test]
fn evicted_player_reloads_with_pending_awards() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = service_over(&storage);
    let config = GuildLevelConfig::default();

    let _ = service.reward_fixed(GuildId(1), &profile(4), Some(&config), 13);
    service.invalidate_player(GuildId(1), UserId(4));

    let info = service.level_info(GuildId(1), &profile(4), Some(&config)).expect("info");
    assert_eq!(info.display_experience, 13);
}

#[test]
fn experience_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("levelz.db");
    let config = LevelzConfig::default();

    {
        let storage = Arc::new(SqliteStorage::open(&path, &config.persistence).expect("open"));
        let service = service_over(&storage);
        let _ = service
            .give_experience(GuildId(1), &profile(1), None, 250)
            .expect("give");
        service.flush().expect("flush");
    }

    let storage = Arc::new(SqliteStorage::open(&path, &config.persistence).expect("reopen"));
    let service = service_over(&storage);
    let snapshot = service
        .player_snapshot(GuildId(1), &profile(1), None)
        .expect("snapshot");
    assert_eq!(snapshot.record.experience, 350);
    assert_eq!(snapshot.global_experience, 250);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_enqueue_then_drain_is_exact() {
    let queue = ExperienceQueue::new();
    let handles: Vec<_> = (0..16u64)
        .map(|t| {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..250 {
                    queue.enqueue(UserId(t), GuildId(i % 3), 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(queue.drain().len(), 16 * 250);
    assert!(queue.drain().is_empty());
}

#[test]
fn concurrent_messages_award_each_player_once() {
    let storage = Arc::new(SqliteStorage::open_in_memory().expect("open"));
    let service = Arc::new(service_over(&storage));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let config = GuildLevelConfig::default();
                (1..=20u64)
                    .filter(|&u| service.on_message(GuildId(1), &profile(u), Some(&config)).awarded)
                    .count()
            })
        })
        .collect();
    let awarded: usize = handles.into_iter().map(|h| h.join().expect("thread")).sum();

    assert_eq!(awarded, 20, "one award per player per window");
    assert_eq!(storage.player_count().expect("count"), 20);

    let report = service.flush().expect("flush");
    assert_eq!(report.players, 20);
    for user in 1..=20 {
        assert!((110..=114).contains(&stored_experience(&storage, 1, user)));
    }
}
