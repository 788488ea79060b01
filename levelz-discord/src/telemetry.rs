//! Tracing subscriber setup.

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{DiscordError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level` when it is set and valid.
///
/// # Errors
/// Returns [`DiscordError::Config`] for an invalid level directive or when
/// a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| DiscordError::Config(e.to_string()))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| DiscordError::Config(e.to_string()))?;

    info!(level = %config.level, json = config.json, "Tracing initialized");
    Ok(())
}
