//! Side effects of a level-up: role changes and alert messages.
//!
//! The core engine only plans; the collaborators here talk to the chat
//! platform. Failures are logged per effect and never abort the others.

use std::collections::HashSet;

use levelz_core::{
    AlertTemplate, ChannelId, GuildId, GuildLevelConfig, LevelOutcome, LevelUpAlert, RoleId,
    UserId,
};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::AlertTemplates;
use crate::error::Result;

/// Grants and revokes member roles.
pub trait RoleManager: Send + Sync {
    /// Display name of a role, or `None` if it no longer exists.
    fn role_name(&self, guild_id: GuildId, role_id: RoleId) -> Option<String>;

    /// Roles the member currently holds.
    ///
    /// # Errors
    /// Returns a platform error when membership cannot be read.
    fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<RoleId>>;

    /// Add roles to a member.
    ///
    /// # Errors
    /// Returns [`DiscordError::Role`](crate::DiscordError::Role) on rejection.
    fn add_roles(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> Result<()>;

    /// Remove roles from a member.
    ///
    /// # Errors
    /// Returns [`DiscordError::Role`](crate::DiscordError::Role) on rejection.
    fn remove_roles(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> Result<()>;
}

/// Delivers rendered level-up alerts.
pub trait AlertSink: Send + Sync {
    /// Post `text` to `channel_id`.
    ///
    /// # Errors
    /// Returns [`DiscordError::Alert`](crate::DiscordError::Alert) on failure.
    fn send(&self, channel_id: ChannelId, text: &str) -> Result<()>;
}

/// Read-only source of per-guild leveling settings.
pub trait GuildConfigSource: Send + Sync {
    /// The guild's settings; `None` disables leveling for it.
    fn level_config(&self, guild_id: GuildId) -> Option<GuildLevelConfig>;
}

/// What [`apply_outcome`] actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedEffects {
    /// Roles added.
    pub granted: Vec<RoleId>,
    /// Roles removed.
    pub revoked: Vec<RoleId>,
    /// Where an alert was posted, if one was.
    pub alert_channel: Option<ChannelId>,
}

/// Render an alert from a random template of the matching family.
///
/// A role reward whose role was deleted falls back to the generic family.
pub fn render_alert<R: Rng + ?Sized>(
    rng: &mut R,
    templates: &AlertTemplates,
    alert: &LevelUpAlert,
    user_mention: &str,
    role_name: Option<&str>,
) -> String {
    let (family, role) = match (alert.template, role_name) {
        (AlertTemplate::RoleReward { .. }, Some(name)) if !templates.role_reward.is_empty() => {
            (&templates.role_reward, name)
        }
        _ => (&templates.generic, ""),
    };
    let template = family
        .choose(rng)
        .map_or("{user} reached level {level}", String::as_str);
    template
        .replace("{user}", user_mention)
        .replace("{level}", &alert.level.to_string())
        .replace("{role}", role)
}

/// Carry out a level-up outcome for the author of a message.
///
/// Roles the member already holds are not re-granted, and only held roles
/// are revoked. `source_channel` receives the alert when the guild has no
/// level-up channel.
pub fn apply_outcome(
    outcome: &LevelOutcome,
    guild_id: GuildId,
    user_id: UserId,
    source_channel: ChannelId,
    roles: &dyn RoleManager,
    alerts: &dyn AlertSink,
    templates: &AlertTemplates,
) -> AppliedEffects {
    let mut applied = AppliedEffects::default();
    if !outcome.leveled_up {
        return applied;
    }

    if !outcome.roles.is_empty() {
        apply_roles(outcome, guild_id, user_id, roles, &mut applied);
    }

    if let Some(alert) = &outcome.alert {
        let role_name = match alert.template {
            AlertTemplate::RoleReward { role_id } => roles.role_name(guild_id, role_id),
            AlertTemplate::Generic => None,
        };
        let text = render_alert(
            &mut rand::thread_rng(),
            templates,
            alert,
            &format!("<@{user_id}>"),
            role_name.as_deref(),
        );
        let channel = alert.channel_id.unwrap_or(source_channel);
        match alerts.send(channel, &text) {
            Ok(()) => applied.alert_channel = Some(channel),
            Err(e) => warn!(guild = %guild_id, channel = %channel, error = %e, "Failed to post level-up alert"),
        }
    }

    applied
}

fn apply_roles(
    outcome: &LevelOutcome,
    guild_id: GuildId,
    user_id: UserId,
    roles: &dyn RoleManager,
    applied: &mut AppliedEffects,
) {
    let held: HashSet<RoleId> = match roles.member_roles(guild_id, user_id) {
        Ok(held) => held.into_iter().collect(),
        Err(e) => {
            warn!(guild = %guild_id, user = %user_id, error = %e, "Failed to read member roles");
            return;
        }
    };

    let grant: Vec<RoleId> = outcome
        .roles
        .grant
        .iter()
        .copied()
        .filter(|r| !held.contains(r) && roles.role_name(guild_id, *r).is_some())
        .collect();
    if !grant.is_empty() {
        match roles.add_roles(guild_id, user_id, &grant) {
            Ok(()) => applied.granted = grant,
            Err(e) => {
                warn!(guild = %guild_id, user = %user_id, error = %e, "Failed to grant level roles");
                return;
            }
        }
    }

    let revoke: Vec<RoleId> = outcome
        .roles
        .revoke
        .iter()
        .copied()
        .filter(|r| held.contains(r) || applied.granted.contains(r))
        .collect();
    if revoke.is_empty() {
        return;
    }
    match roles.remove_roles(guild_id, user_id, &revoke) {
        Ok(()) => {
            debug!(guild = %guild_id, user = %user_id, revoked = revoke.len(), "Applied role hierarchy");
            applied.revoked = revoke;
        }
        Err(e) => warn!(guild = %guild_id, user = %user_id, error = %e, "Failed to revoke level roles"),
    }
}
