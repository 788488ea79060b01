//! In-memory collaborators for the simulator and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use levelz_core::{ChannelId, GuildId, GuildLevelConfig, RoleId, UserId};
use parking_lot::{Mutex, RwLock};

use crate::effects::{AlertSink, GuildConfigSource, RoleManager};
use crate::error::Result;

/// Role registry and member role sets kept in memory.
#[derive(Debug, Default)]
pub struct RecordingRoles {
    names: RwLock<HashMap<(GuildId, RoleId), String>>,
    members: Mutex<HashMap<(GuildId, UserId), BTreeSet<RoleId>>>,
}

impl RecordingRoles {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a role.
    pub fn define_role(&self, guild_id: GuildId, role_id: RoleId, name: impl Into<String>) {
        self.names.write().insert((guild_id, role_id), name.into());
    }

    /// Give a member a role directly.
    pub fn give(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) {
        self.members
            .lock()
            .entry((guild_id, user_id))
            .or_default()
            .insert(role_id);
    }

    /// Roles a member holds, ascending by id.
    #[must_use]
    pub fn held(&self, guild_id: GuildId, user_id: UserId) -> Vec<RoleId> {
        self.members
            .lock()
            .get(&(guild_id, user_id))
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl RoleManager for RecordingRoles {
    fn role_name(&self, guild_id: GuildId, role_id: RoleId) -> Option<String> {
        self.names.read().get(&(guild_id, role_id)).cloned()
    }

    fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<RoleId>> {
        Ok(self.held(guild_id, user_id))
    }

    fn add_roles(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> Result<()> {
        self.members
            .lock()
            .entry((guild_id, user_id))
            .or_default()
            .extend(roles.iter().copied());
        Ok(())
    }

    fn remove_roles(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> Result<()> {
        if let Some(held) = self.members.lock().get_mut(&(guild_id, user_id)) {
            for role in roles {
                held.remove(role);
            }
        }
        Ok(())
    }
}

/// Collects every alert it is asked to post.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<(ChannelId, String)>>,
}

impl RecordingAlerts {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything posted so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn send(&self, channel_id: ChannelId, text: &str) -> Result<()> {
        self.sent.lock().push((channel_id, text.to_string()));
        Ok(())
    }
}

/// Guild settings held in a map.
#[derive(Debug, Default)]
pub struct StaticGuildConfigs {
    configs: RwLock<BTreeMap<GuildId, GuildLevelConfig>>,
}

impl StaticGuildConfigs {
    /// No guild has leveling enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a guild's settings.
    pub fn insert(&self, guild_id: GuildId, config: GuildLevelConfig) {
        self.configs.write().insert(guild_id, config);
    }
}

impl GuildConfigSource for StaticGuildConfigs {
    fn level_config(&self, guild_id: GuildId) -> Option<GuildLevelConfig> {
        self.configs.read().get(&guild_id).cloned()
    }
}
