//! Message hook: the entry point a bot's event loop calls for every message.
//!
//! Direct messages and guilds without leveling are ignored. Guild messages
//! go through the engine and, on a level-up, the role and alert effects are
//! applied for the author.

use std::sync::Arc;

use levelz_core::{ExperienceService, RewardResult};
use tracing::debug;

use crate::config::AlertTemplates;
use crate::effects::{AlertSink, AppliedEffects, GuildConfigSource, RoleManager, apply_outcome};
use crate::error::Result;
use crate::events::MessageEvent;

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledMessage {
    /// Engine result.
    pub reward: RewardResult,
    /// Platform effects that were applied.
    pub effects: AppliedEffects,
}

/// Routes messages into the engine and applies the outcomes.
pub struct LevelingHook {
    service: Arc<ExperienceService>,
    configs: Arc<dyn GuildConfigSource>,
    roles: Arc<dyn RoleManager>,
    alerts: Arc<dyn AlertSink>,
    templates: AlertTemplates,
}

impl std::fmt::Debug for LevelingHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelingHook")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl LevelingHook {
    /// Wire a hook to its collaborators.
    #[must_use]
    pub fn new(
        service: Arc<ExperienceService>,
        configs: Arc<dyn GuildConfigSource>,
        roles: Arc<dyn RoleManager>,
        alerts: Arc<dyn AlertSink>,
        templates: AlertTemplates,
    ) -> Self {
        Self {
            service,
            configs,
            roles,
            alerts,
            templates,
        }
    }

    /// The engine behind this hook.
    #[must_use]
    pub fn service(&self) -> &Arc<ExperienceService> {
        &self.service
    }

    /// Handle a message on the calling thread. May block on storage.
    ///
    /// Returns `None` for direct messages.
    pub fn on_message(&self, event: &MessageEvent) -> Option<HandledMessage> {
        let guild_id = event.guild_id?;
        let config = self.configs.level_config(guild_id);
        let reward = self
            .service
            .on_message(guild_id, &event.author, config.as_ref());

        let effects = match &reward.outcome {
            Some(outcome) if outcome.leveled_up => {
                debug!(
                    guild = %guild_id,
                    user = %event.author.user_id,
                    level = outcome.level_after,
                    "Applying level-up effects"
                );
                apply_outcome(
                    outcome,
                    guild_id,
                    event.author.user_id,
                    event.channel_id,
                    self.roles.as_ref(),
                    self.alerts.as_ref(),
                    &self.templates,
                )
            }
            _ => AppliedEffects::default(),
        };

        Some(HandledMessage { reward, effects })
    }

    /// Handle a message from async code, running the engine on the blocking
    /// pool.
    ///
    /// # Errors
    /// Returns [`DiscordError::Task`](crate::DiscordError::Task) if the
    /// blocking task panicked.
    pub async fn on_message_async(self: &Arc<Self>, event: MessageEvent) -> Result<Option<HandledMessage>> {
        let hook = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || hook.on_message(&event)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{RecordingAlerts, RecordingRoles, StaticGuildConfigs};
    use levelz_core::storage::SqliteStorage;
    use levelz_core::{ChannelId, GuildId, GuildLevelConfig, LevelzConfig, PlayerStorage, UserId, UserProfile};

    fn hook(configs: StaticGuildConfigs) -> LevelingHook {
        let storage: Arc<dyn PlayerStorage> = Arc::new(SqliteStorage::open_in_memory().expect("open"));
        LevelingHook::new(
            Arc::new(ExperienceService::new(storage, &LevelzConfig::default())),
            Arc::new(configs),
            Arc::new(RecordingRoles::new()),
            Arc::new(RecordingAlerts::new()),
            AlertTemplates::default(),
        )
    }

    #[test]
    fn direct_messages_are_ignored() {
        let hook = hook(StaticGuildConfigs::new());
        let event = MessageEvent::direct(ChannelId(1), UserProfile::new(UserId(1), "a", "0001"), "hi");
        assert!(hook.on_message(&event).is_none());
    }

    #[test]
    fn unconfigured_guild_awards_nothing() {
        let hook = hook(StaticGuildConfigs::new());
        let event = MessageEvent::guild(GuildId(1), ChannelId(1), UserProfile::new(UserId(1), "a", "0001"), "hi");
        let handled = hook.on_message(&event).expect("guild message");
        assert!(!handled.reward.awarded);
    }

    #[test]
    fn configured_guild_awards() {
        let configs = StaticGuildConfigs::new();
        configs.insert(GuildId(1), GuildLevelConfig::default());
        let hook = hook(configs);
        let event = MessageEvent::guild(GuildId(1), ChannelId(1), UserProfile::new(UserId(1), "a", "0001"), "hi");
        let handled = hook.on_message(&event).expect("guild message");
        assert!(handled.reward.awarded);
        assert_eq!(handled.effects, AppliedEffects::default());
    }
}
