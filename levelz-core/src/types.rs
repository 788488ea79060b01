//! Core type definitions for the levelz experience engine.
//!
//! Identifiers are thin `u64` newtypes (chat platform snowflakes) so a guild
//! id can never be passed where a user id is expected.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Experience every freshly created player starts with.
///
/// The leveling math offsets this floor back out, so a brand-new player sits
/// at level 0 with zero displayed experience.
pub const EXPERIENCE_FLOOR: i64 = 100;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(
    /// A guild (server) identifier.
    GuildId
);
snowflake!(
    /// A user identifier.
    UserId
);
snowflake!(
    /// A role identifier.
    RoleId
);
snowflake!(
    /// A text channel identifier.
    ChannelId
);

/// Cache, rate-limit and single-flight key: one player in one guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerKey {
    /// Guild the experience belongs to.
    pub guild_id: GuildId,
    /// The player.
    pub user_id: UserId,
}

impl PlayerKey {
    /// Build a key from its parts.
    #[must_use]
    pub const fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self { guild_id, user_id }
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guild_id, self.user_id)
    }
}

// ---------------------------------------------------------------------------
// Player data
// ---------------------------------------------------------------------------

/// Display metadata carried by every inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Author id.
    pub user_id: UserId,
    /// Current username.
    pub username: String,
    /// Current discriminator / tag.
    pub discriminator: String,
    /// Current avatar hash, if any.
    pub avatar: Option<String>,
    /// Bot accounts never earn experience.
    #[serde(default)]
    pub is_bot: bool,
}

impl UserProfile {
    /// A human (non-bot) profile.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            discriminator: discriminator.into(),
            avatar: None,
            is_bot: false,
        }
    }

    /// Builder-style avatar setter.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// One row of the `players` table, denormalised with display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Guild the experience belongs to.
    pub guild_id: GuildId,
    /// The player.
    pub user_id: UserId,
    /// Username as last persisted.
    pub username: String,
    /// Discriminator as last persisted.
    pub discriminator: String,
    /// Avatar hash as last persisted.
    pub avatar: Option<String>,
    /// Cumulative experience including [`EXPERIENCE_FLOOR`]. Never negative.
    pub experience: i64,
    /// When the player was last seen by this process.
    pub last_seen: DateTime<Utc>,
}

impl PlayerRecord {
    /// A first-seen record at the experience floor.
    #[must_use]
    pub fn new(guild_id: GuildId, profile: &UserProfile) -> Self {
        Self {
            guild_id,
            user_id: profile.user_id,
            username: profile.username.clone(),
            discriminator: profile.discriminator.clone(),
            avatar: profile.avatar.clone(),
            experience: EXPERIENCE_FLOOR,
            last_seen: Utc::now(),
        }
    }

    /// This record's cache key.
    #[must_use]
    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.guild_id, self.user_id)
    }

    /// Whether the profile's display metadata differs from what is stored.
    #[must_use]
    pub fn metadata_differs(&self, profile: &UserProfile) -> bool {
        self.username != profile.username
            || self.discriminator != profile.discriminator
            || self.avatar != profile.avatar
    }

    /// Copy the profile's display metadata onto the record.
    pub fn apply_metadata(&mut self, profile: &UserProfile) {
        self.username.clone_from(&profile.username);
        self.discriminator.clone_from(&profile.discriminator);
        self.avatar.clone_from(&profile.avatar);
    }

    /// Add experience, saturating at zero for negative corrections.
    pub fn add_experience(&mut self, amount: i64) {
        self.experience = self.experience.saturating_add(amount).max(0);
    }
}

// ---------------------------------------------------------------------------
// Guild configuration (read-only to the engine)
// ---------------------------------------------------------------------------

/// Per-guild leveling settings, owned by the guild configuration subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildLevelConfig {
    /// Master switch for the levels feature.
    #[serde(default = "default_true")]
    pub levels_enabled: bool,
    /// Curve modifier; negative means "use the default".
    #[serde(default = "default_modifier")]
    pub level_modifier: f64,
    /// Post a message when a member levels up.
    #[serde(default)]
    pub level_alerts_enabled: bool,
    /// Where level-up alerts go; `None` means the channel of the message.
    #[serde(default)]
    pub level_up_channel_id: Option<ChannelId>,
    /// Keep only the highest earned level role.
    #[serde(default)]
    pub level_hierarchy_enabled: bool,
    /// Level → role rewards, ordered by level.
    #[serde(default)]
    pub level_roles: BTreeMap<u64, RoleId>,
}

impl Default for GuildLevelConfig {
    fn default() -> Self {
        Self {
            levels_enabled: true,
            level_modifier: -1.0,
            level_alerts_enabled: false,
            level_up_channel_id: None,
            level_hierarchy_enabled: false,
            level_roles: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_modifier() -> f64 {
    -1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_at_floor() {
        let profile = UserProfile::new(UserId(7), "ava", "0001");
        let record = PlayerRecord::new(GuildId(1), &profile);
        assert_eq!(record.experience, EXPERIENCE_FLOOR);
        assert_eq!(record.key(), PlayerKey::new(GuildId(1), UserId(7)));
    }

    #[test]
    fn negative_correction_saturates_at_zero() {
        let profile = UserProfile::new(UserId(7), "ava", "0001");
        let mut record = PlayerRecord::new(GuildId(1), &profile);
        record.add_experience(-10_000);
        assert_eq!(record.experience, 0);
    }

    #[test]
    fn guild_config_fields_default_when_absent() {
        let config: GuildLevelConfig = serde_json::from_str("{}").expect("parse");
        assert!(config.levels_enabled);
        assert!((config.level_modifier + 1.0).abs() < f64::EPSILON);
        assert!(config.level_roles.is_empty());
    }

    #[test]
    fn metadata_change_detection() {
        let profile = UserProfile::new(UserId(7), "ava", "0001");
        let mut record = PlayerRecord::new(GuildId(1), &profile);
        assert!(!record.metadata_differs(&profile));

        let renamed = profile.clone().with_avatar("a_hash");
        assert!(record.metadata_differs(&renamed));
        record.apply_metadata(&renamed);
        assert!(!record.metadata_differs(&renamed));
    }

    #[test]
    fn guild_config_deserializes_with_defaults() {
        let config: GuildLevelConfig = serde_json::from_str(
            r#"{"level_alerts_enabled": true, "level_roles": {"5": 500, "10": 1000}}"#,
        )
        .expect("parse");
        assert!(config.levels_enabled);
        assert!(config.level_modifier < 0.0);
        assert_eq!(config.level_roles.get(&5), Some(&RoleId(500)));
    }

    #[test]
    fn player_key_display() {
        assert_eq!(PlayerKey::new(GuildId(3), UserId(4)).to_string(), "3:4");
    }
}
