//! Discord platform adapter — talks to the Discord REST API v10.
//!
//! Only the handful of endpoints the tour engine needs: guild metadata,
//! channels, members, roles, role grants, and message delivery (DM and
//! channel). Gateway events arrive through whatever front-end drives the
//! manager; this adapter is purely outbound.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::PlatformError;
use crate::platform::{ChannelInfo, ChatPlatform, MemberInfo, RoleInfo};
use crate::tour::view::{Notice, StepMessage};

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord text channel type in the channel list payload.
const CHANNEL_TYPE_TEXT: i64 = 0;

pub struct DiscordPlatform {
    bot_token: SecretString,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GuildPayload {
    name: String,
}

#[derive(Deserialize)]
struct ChannelPayload {
    id: String,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: i64,
}

#[derive(Deserialize)]
struct UserPayload {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct MemberPayload {
    user: UserPayload,
    nick: Option<String>,
    roles: Vec<String>,
}

#[derive(Deserialize)]
struct RolePayload {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct DmChannelPayload {
    id: String,
}

impl DiscordPlatform {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token.expose_secret())
    }

    /// GET an endpoint and decode JSON. 404 becomes `Ok(None)`; other
    /// non-success statuses are API errors.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<Option<T>, PlatformError> {
        let resp = self
            .client
            .get(format!("{API_BASE}{endpoint}"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::ApiError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let value = resp
            .json::<T>()
            .await
            .map_err(|e| PlatformError::InvalidResponse(format!("{endpoint}: {e}")))?;
        Ok(Some(value))
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PlatformError> {
        let resp = self
            .client
            .post(format!("{API_BASE}{endpoint}"))
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::ApiError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(format!("{endpoint}: {e}")))
    }

    /// Open (or reuse) the DM channel with a user.
    async fn open_dm_channel(&self, user_id: &str) -> Result<String, PlatformError> {
        let payload = self
            .post_json("/users/@me/channels", &json!({ "recipient_id": user_id }))
            .await
            .map_err(|e| PlatformError::DeliveryFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;
        let channel: DmChannelPayload = serde_json::from_value(payload)
            .map_err(|e| PlatformError::InvalidResponse(format!("DM channel: {e}")))?;
        Ok(channel.id)
    }

    /// Build the embed payload for a tour step, including the nav buttons.
    /// Button custom ids carry the tour and user so a handler can route
    /// the press without server-side session state.
    fn step_payload(message: &StepMessage) -> serde_json::Value {
        let mut embed = json!({
            "title": message.title,
            "description": message.description,
            "color": 0x0099FF,
            "footer": { "text": message.footer },
        });
        if let Some(url) = &message.image_url {
            embed["image"] = json!({ "url": url });
        }
        if let Some(url) = &message.video_url {
            embed["video"] = json!({ "url": url });
        }

        let suffix = format!("{}_{}", message.tour_id, message.user_id);
        let buttons = json!([
            {
                "type": 2,
                "style": 2,
                "label": "Back",
                "custom_id": format!("tour_back_{suffix}"),
                "disabled": !message.back_enabled,
            },
            {
                "type": 2,
                "style": 1,
                "label": message.next_label,
                "custom_id": format!("tour_next_{suffix}"),
            },
            {
                "type": 2,
                "style": 4,
                "label": "End Tour",
                "custom_id": format!("tour_end_{suffix}"),
            },
        ]);

        let mut content = serde_json::Value::Null;
        if let Some(channel_id) = &message.channel_to_showcase {
            content = json!(format!("Check out <#{channel_id}>!"));
        }

        json!({
            "content": content,
            "embeds": [embed],
            "components": [{ "type": 1, "components": buttons }],
        })
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn guild_name(&self, guild_id: &str) -> Result<String, PlatformError> {
        let guild: GuildPayload = self
            .get_json(&format!("/guilds/{guild_id}"))
            .await?
            .ok_or_else(|| PlatformError::InvalidResponse(format!("guild {guild_id} not found")))?;
        Ok(guild.name)
    }

    async fn guild_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>, PlatformError> {
        let channels: Vec<ChannelPayload> = self
            .get_json(&format!("/guilds/{guild_id}/channels"))
            .await?
            .unwrap_or_default();
        Ok(channels
            .into_iter()
            .filter(|c| c.kind == CHANNEL_TYPE_TEXT)
            .filter_map(|c| {
                c.name.map(|name| ChannelInfo { id: c.id, name })
            })
            .collect())
    }

    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberInfo>, PlatformError> {
        let member: Option<MemberPayload> = self
            .get_json(&format!("/guilds/{guild_id}/members/{user_id}"))
            .await?;
        Ok(member.map(|m| MemberInfo {
            user_id: m.user.id,
            display_name: m.nick.unwrap_or(m.user.username),
            role_ids: m.roles,
        }))
    }

    async fn fetch_role(
        &self,
        guild_id: &str,
        role_id: &str,
    ) -> Result<Option<RoleInfo>, PlatformError> {
        // Discord has no single-role endpoint; scan the guild role list.
        let roles: Vec<RolePayload> = self
            .get_json(&format!("/guilds/{guild_id}/roles"))
            .await?
            .unwrap_or_default();
        Ok(roles
            .into_iter()
            .find(|r| r.id == role_id)
            .map(|r| RoleInfo {
                id: r.id,
                name: r.name,
            }))
    }

    async fn find_role_by_name(
        &self,
        guild_id: &str,
        name: &str,
    ) -> Result<Option<RoleInfo>, PlatformError> {
        let roles: Vec<RolePayload> = self
            .get_json(&format!("/guilds/{guild_id}/roles"))
            .await?
            .unwrap_or_default();
        Ok(roles
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| RoleInfo {
                id: r.id,
                name: r.name,
            }))
    }

    async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        let endpoint = format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}");
        let resp = self
            .client
            .put(format!("{API_BASE}{endpoint}"))
            .header("Authorization", self.auth_header())
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| PlatformError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::ApiError {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn send_step_dm(
        &self,
        user_id: &str,
        message: &StepMessage,
    ) -> Result<(), PlatformError> {
        let channel_id = self.open_dm_channel(user_id).await?;
        let payload = Self::step_payload(message);
        self.post_json(&format!("/channels/{channel_id}/messages"), &payload)
            .await
            .map_err(|e| PlatformError::DeliveryFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn send_notice_dm(&self, user_id: &str, notice: &Notice) -> Result<(), PlatformError> {
        let channel_id = self.open_dm_channel(user_id).await?;
        let payload = json!({
            "embeds": [{
                "title": notice.title,
                "description": notice.body,
                "color": 0x00FF00,
            }],
        });
        self.post_json(&format!("/channels/{channel_id}/messages"), &payload)
            .await
            .map_err(|e| PlatformError::DeliveryFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.post_json(
            &format!("/channels/{channel_id}/messages"),
            &json!({ "content": content }),
        )
        .await?;
        Ok(())
    }
}
