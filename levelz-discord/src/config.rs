//! Bot-level configuration wrapping the engine's [`LevelzConfig`].
//!
//! ```toml
//! database_path = "levelz.db"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [levelz.flush]
//! interval_seconds = 60
//!
//! [alerts]
//! generic = ["GG {user}, you reached level {level}!"]
//! role_reward = ["{user} hit level {level} and unlocked {role}!"]
//! ```

use std::path::{Path, PathBuf};

use levelz_core::LevelzConfig;
use serde::{Deserialize, Serialize};

use crate::error::{DiscordError, Result};

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Engine settings.
    #[serde(default)]
    pub levelz: LevelzConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Level-up message templates.
    #[serde(default)]
    pub alerts: AlertTemplates,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            levelz: LevelzConfig::default(),
            logging: LoggingConfig::default(),
            alerts: AlertTemplates::default(),
        }
    }
}

impl BotConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns [`DiscordError::Config`] for malformed TOML or bad values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| DiscordError::Config(e.to_string()))?;
        config.levelz.validate()?;
        if config.alerts.generic.is_empty() {
            return Err(DiscordError::Config(
                "alerts.generic needs at least one template".to_string(),
            ));
        }
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("levelz.db")
}

/// Log output settings. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Level-up message families. `{user}`, `{level}` and `{role}` are
/// substituted when an alert is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTemplates {
    /// Used when the new level has no role reward.
    #[serde(default = "default_generic")]
    pub generic: Vec<String>,
    /// Used when the new level unlocked a role.
    #[serde(default = "default_role_reward")]
    pub role_reward: Vec<String>,
}

impl Default for AlertTemplates {
    fn default() -> Self {
        Self {
            generic: default_generic(),
            role_reward: default_role_reward(),
        }
    }
}

fn default_generic() -> Vec<String> {
    vec![
        "GG {user}, you just advanced to **Level {level}**!".to_string(),
        "{user} leveled up! Welcome to **Level {level}**.".to_string(),
    ]
}

fn default_role_reward() -> Vec<String> {
    vec!["GG {user}, you reached **Level {level}** and earned the **{role}** role!".to_string()]
}
