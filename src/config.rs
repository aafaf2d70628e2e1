//! Bot configuration, read from the environment.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Runtime configuration for the bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Path to the local libSQL database file.
    pub db_path: PathBuf,
    /// Discord bot token.
    pub bot_token: SecretString,
    /// Name of the role granted when a user exits a tour early, if any.
    ///
    /// The legacy deployment hardcoded "member" here; we make it opt-in.
    pub exit_role_name: Option<String>,
    /// Name used when bootstrapping the default tour for a guild.
    pub default_tour_name: String,
    /// Channel name used for public completion announcements.
    pub announce_channel_name: String,
}

impl BotConfig {
    /// Build configuration from environment variables.
    ///
    /// `DISCORD_BOT_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("DISCORD_BOT_TOKEN".into()))?;

        Ok(Self {
            db_path: std::env::var("TOUR_BOT_DB_PATH")
                .unwrap_or_else(|_| "./data/tour-bot.db".to_string())
                .into(),
            bot_token: SecretString::from(bot_token),
            exit_role_name: std::env::var("TOUR_BOT_EXIT_ROLE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            default_tour_name: std::env::var("TOUR_BOT_DEFAULT_TOUR_NAME")
                .unwrap_or_else(|_| "Default Server Tour".to_string()),
            announce_channel_name: std::env::var("TOUR_BOT_ANNOUNCE_CHANNEL")
                .unwrap_or_else(|_| "general".to_string()),
        })
    }
}
