//! Replays a synthetic message stream through the full leveling stack.
//!
//! ```text
//! levelz-sim --messages 5000 --guilds 3 --users 200 --no-cooldown
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use levelz_core::storage::{PlayerStorage, SqliteStorage};
use levelz_core::{ChannelId, ExperienceService, GuildId, GuildLevelConfig, RoleId, UserId, UserProfile};
use levelz_discord::effects::{AlertSink, RoleManager};
use levelz_discord::recording::{RecordingAlerts, RecordingRoles, StaticGuildConfigs};
use levelz_discord::systems::spawn_flush_task;
use levelz_discord::telemetry::init_tracing;
use levelz_discord::{BotConfig, LevelingHook, MessageEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "levelz-sim", about = "Replay synthetic chat traffic through levelz")]
struct Args {
    /// Bot configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the database in memory instead of `database_path`.
    #[arg(long)]
    in_memory: bool,

    /// Messages to replay.
    #[arg(long, default_value_t = 1000)]
    messages: usize,

    /// Guilds to spread traffic over.
    #[arg(long, default_value_t = 2)]
    guilds: u64,

    /// Distinct authors.
    #[arg(long, default_value_t = 50)]
    users: u64,

    /// RNG seed for the message stream.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Disable the award cooldown so every message earns experience.
    #[arg(long)]
    no_cooldown: bool,

    /// Print counters in Prometheus text format at the end.
    #[arg(long)]
    metrics: bool,
}

fn guild_config(guild: GuildId, roles: &RecordingRoles) -> GuildLevelConfig {
    let mut level_roles = BTreeMap::new();
    for (i, level) in [5u64, 10, 15].into_iter().enumerate() {
        let role = RoleId(guild.0 * 100 + i as u64);
        roles.define_role(guild, role, format!("Level {level}"));
        level_roles.insert(level, role);
    }
    GuildLevelConfig {
        level_alerts_enabled: true,
        level_hierarchy_enabled: guild.0 % 2 == 1,
        level_roles,
        ..GuildLevelConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BotConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => BotConfig::default(),
    };
    if args.no_cooldown {
        config.levelz.rate_limit.window_seconds = 0;
    }
    init_tracing(&config.logging)?;

    let storage: Arc<dyn PlayerStorage> = if args.in_memory {
        Arc::new(SqliteStorage::open_in_memory()?)
    } else {
        Arc::new(
            SqliteStorage::open(&config.database_path, &config.levelz.persistence)
                .with_context(|| format!("opening {}", config.database_path.display()))?,
        )
    };
    let service = Arc::new(ExperienceService::new(storage, &config.levelz));

    let roles = Arc::new(RecordingRoles::new());
    let configs = Arc::new(StaticGuildConfigs::new());
    for g in 1..=args.guilds {
        configs.insert(GuildId(g), guild_config(GuildId(g), &roles));
    }
    let alerts = Arc::new(RecordingAlerts::new());
    let hook = Arc::new(LevelingHook::new(
        Arc::clone(&service),
        configs,
        Arc::clone(&roles) as Arc<dyn RoleManager>,
        Arc::clone(&alerts) as Arc<dyn AlertSink>,
        config.alerts.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = spawn_flush_task(Arc::clone(&service), &config.levelz.flush, shutdown_rx);

    info!(messages = args.messages, guilds = args.guilds, users = args.users, "Replaying traffic");
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut level_ups = 0usize;
    for i in 0..args.messages {
        let guild = GuildId(rng.gen_range(1..=args.guilds.max(1)));
        let user = rng.gen_range(1..=args.users.max(1));
        let author = UserProfile::new(UserId(user), format!("user{user}"), format!("{:04}", user % 10_000));
        let event = MessageEvent::guild(guild, ChannelId(guild.0 * 1000), author, format!("message {i}"));

        let handled = hook.on_message_async(event).await?;
        if handled.is_some_and(|h| h.reward.leveled_up) {
            level_ups += 1;
        }
    }

    shutdown_tx.send(true).context("flush task already stopped")?;
    let summary = flusher.await?;
    info!(flushes = summary.flushes, entries = summary.entries, "Flushed");

    for g in 1..=args.guilds {
        service.invalidate_leaderboard(GuildId(g));
        println!("Guild {g}");
        for (rank, entry) in service.top_n(GuildId(g), 10).iter().enumerate() {
            println!(
                "  #{:<3} {:<12} {:>8} xp",
                rank + 1,
                entry.username,
                entry.display_experience()
            );
        }
    }
    println!("level-ups: {level_ups}, alerts posted: {}", alerts.sent().len());

    if args.metrics {
        print!("{}", service.counters().snapshot().to_prometheus());
    }
    Ok(())
}
