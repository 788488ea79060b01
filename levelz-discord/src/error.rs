//! Error types for the chat integration layer.

use levelz_core::{GuildId, LevelzError, RoleId, UserId};
use thiserror::Error;

/// Errors raised while applying levelz outcomes to the chat platform.
#[derive(Error, Debug)]
pub enum DiscordError {
    /// The core engine failed.
    #[error(transparent)]
    Core(#[from] LevelzError),

    /// A role grant or revoke was rejected by the platform.
    #[error("Role update failed for user {user} in guild {guild} (role {role:?}): {reason}")]
    Role {
        /// Guild of the member.
        guild: GuildId,
        /// Member being updated.
        user: UserId,
        /// The role involved, when known.
        role: Option<RoleId>,
        /// Platform message.
        reason: String,
    },

    /// A level-up alert could not be delivered.
    #[error("Alert delivery failed: {0}")]
    Alert(String),

    /// Bot configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, DiscordError>;
