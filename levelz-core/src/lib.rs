//! # levelz core library
//!
//! Platform-agnostic experience engine for chat communities. Members earn
//! experience by talking; the engine keeps hot player records in memory,
//! throttles awards, batches the resulting writes and answers level and rank
//! queries.
//!
//! - [`curve`]: level ↔ experience math
//! - [`players`]: read-through TTL cache of player records
//! - [`rate_limit`]: one award per player per window
//! - [`queue`] and [`flush`]: write-back of awarded experience
//! - [`leveling`]: level-up detection, alerts and role plans
//! - [`leaderboard`]: cached ranks and top lists
//! - [`service`]: the [`ExperienceService`] tying them together
//!
//! ## Consistency
//!
//! Persisted experience trails the cache by at most one flush interval, and
//! ranks trail persisted experience by at most one leaderboard TTL. A failed
//! flush loses its batch.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod curve;
pub mod error;
pub mod flush;
pub mod leaderboard;
pub mod leveling;
pub mod metrics;
pub mod players;
pub mod queue;
pub mod rate_limit;
pub mod service;
pub mod single_flight;
pub mod storage;
pub mod types;

pub use config::LevelzConfig;
pub use error::{LevelzError, Result};
pub use leaderboard::{LeaderboardEntry, Rank};
pub use leveling::{AlertTemplate, LevelOutcome, LevelUpAlert, RolePlan};
pub use service::{ExperienceService, PlayerSnapshot, RewardResult};
pub use storage::{PlayerStorage, SqliteStorage};
pub use types::*;
