//! Chat platform abstraction.
//!
//! The tour engine never talks to a chat API directly; it goes through
//! `ChatPlatform` so the core stays testable and the REST adapter stays
//! swappable.

pub mod discord;

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::tour::view::{Notice, StepMessage};

pub use discord::DiscordPlatform;

/// A guild channel as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// A guild member snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub user_id: String,
    pub display_name: String,
    pub role_ids: Vec<String>,
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub id: String,
    pub name: String,
}

/// Async interface to the chat service.
///
/// Identifier-taking methods return `Ok(None)` for not-found and reserve
/// `Err` for transport or API failures.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Human-readable guild name for rendering messages.
    async fn guild_name(&self, guild_id: &str) -> Result<String, PlatformError>;

    /// All channels visible to the bot in a guild.
    async fn guild_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Look up a member. `None` when the user has left the guild.
    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberInfo>, PlatformError>;

    /// Look up a role by id.
    async fn fetch_role(
        &self,
        guild_id: &str,
        role_id: &str,
    ) -> Result<Option<RoleInfo>, PlatformError>;

    /// Case-insensitive role lookup by name.
    async fn find_role_by_name(
        &self,
        guild_id: &str,
        name: &str,
    ) -> Result<Option<RoleInfo>, PlatformError>;

    /// Add a role to a member.
    async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError>;

    /// Deliver a tour step to the user's direct messages.
    async fn send_step_dm(&self, user_id: &str, message: &StepMessage)
    -> Result<(), PlatformError>;

    /// Deliver a plain notice to the user's direct messages.
    async fn send_notice_dm(&self, user_id: &str, notice: &Notice) -> Result<(), PlatformError>;

    /// Post a plain message to a guild channel.
    async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<(), PlatformError>;
}
