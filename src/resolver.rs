//! Channel resolution and self-healing.
//!
//! Guild configs store channel ids for the rules, announcements, and
//! guides channels. Channels get deleted and recreated by admins, so
//! before rendering anything the resolver validates each stored id
//! against the live channel list and falls back to a case-insensitive
//! name match, writing the repaired id back to the store.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::TourError;
use crate::platform::{ChannelInfo, ChatPlatform};
use crate::store::Store;
use crate::store::model::{ConfigUpdate, ServerConfig};

/// The fixed channel roles the tour engine knows about.
const CHANNEL_ROLES: &[(&str, &str)] = &[
    ("rules_channel_id", "rules"),
    ("announcements_channel_id", "announcements"),
    ("guides_channel_id", "guides"),
];

/// Fetch the guild config, creating it if missing, and validate its
/// channel ids against the live guild. Repairs are persisted; a channel
/// that can be neither validated nor found by name keeps its stored value
/// (placeholder substitution simply won't fire for it).
pub async fn resolve_config(
    store: &Arc<dyn Store>,
    platform: &Arc<dyn ChatPlatform>,
    guild_id: &str,
) -> Result<ServerConfig, TourError> {
    store.ensure_config(guild_id).await?;
    let mut config = store
        .get_config(guild_id)
        .await?
        .unwrap_or_else(|| ServerConfig {
            guild_id: guild_id.to_string(),
            ..Default::default()
        });

    let channels = platform.guild_channels(guild_id).await?;

    for (field, fallback_name) in CHANNEL_ROLES {
        let stored = config_field(&config, field).map(str::to_string);

        let valid = stored
            .as_deref()
            .is_some_and(|id| channels.iter().any(|c| c.id == id));
        if valid {
            continue;
        }

        if let Some(stale) = &stored {
            warn!(guild_id, field, stale, "Stored channel id no longer exists");
        }

        match find_channel_by_name(&channels, fallback_name) {
            Some(found) => {
                info!(
                    guild_id,
                    field,
                    channel = %found.name,
                    id = %found.id,
                    "Repairing channel config by name match"
                );
                if let Some(update) = ConfigUpdate::parse(field, Some(&found.id)) {
                    store.update_config(guild_id, &[update]).await?;
                }
                set_config_field(&mut config, field, Some(found.id.clone()));
            }
            None => {
                debug!(guild_id, field, fallback_name, "No channel found by name");
            }
        }
    }

    Ok(config)
}

fn find_channel_by_name<'a>(channels: &'a [ChannelInfo], name: &str) -> Option<&'a ChannelInfo> {
    channels.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

fn config_field<'a>(config: &'a ServerConfig, field: &str) -> Option<&'a str> {
    match field {
        "rules_channel_id" => config.rules_channel_id.as_deref(),
        "announcements_channel_id" => config.announcements_channel_id.as_deref(),
        "guides_channel_id" => config.guides_channel_id.as_deref(),
        _ => None,
    }
}

fn set_config_field(config: &mut ServerConfig, field: &str, value: Option<String>) {
    match field {
        "rules_channel_id" => config.rules_channel_id = value,
        "announcements_channel_id" => config.announcements_channel_id = value,
        "guides_channel_id" => config.guides_channel_id = value,
        _ => {}
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Safe: the pattern is a literal known to compile.
    RE.get_or_init(|| Regex::new(r"<#([a-z_]+)>").unwrap_or_else(|_| unreachable!()))
}

/// Replace `<#rules_channel_id>`-style placeholders in step text with the
/// resolved channel mention. Placeholders whose channel isn't configured
/// are left as-is so authors can see what's missing.
pub fn substitute_placeholders(text: &str, config: &ServerConfig) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            match config_field(config, token) {
                Some(id) => format!("<#{id}>"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
