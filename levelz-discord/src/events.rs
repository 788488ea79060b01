//! Inbound chat events the leveling hooks react to.

use levelz_core::{ChannelId, GuildId, UserProfile};
use serde::{Deserialize, Serialize};

/// A message posted somewhere the bot can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Guild the message was posted in; `None` for direct messages.
    pub guild_id: Option<GuildId>,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// Author identity and display metadata.
    pub author: UserProfile,
    /// Message text.
    pub content: String,
}

impl MessageEvent {
    /// A guild message.
    #[must_use]
    pub fn guild(
        guild_id: GuildId,
        channel_id: ChannelId,
        author: UserProfile,
        content: impl Into<String>,
    ) -> Self {
        Self {
            guild_id: Some(guild_id),
            channel_id,
            author,
            content: content.into(),
        }
    }

    /// A direct message.
    #[must_use]
    pub fn direct(channel_id: ChannelId, author: UserProfile, content: impl Into<String>) -> Self {
        Self {
            guild_id: None,
            channel_id,
            author,
            content: content.into(),
        }
    }

    /// Whether the message was posted in a guild.
    #[must_use]
    pub fn is_guild(&self) -> bool {
        self.guild_id.is_some()
    }
}
