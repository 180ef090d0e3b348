use super::{ChatGateway, ChatMessage, api_base, fetch_json};
use crate::error::GatewayError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv";
const PAGE_SIZE: &str = "100";

#[derive(Deserialize)]
struct HelixResponse {
    #[serde(default)]
    data: Vec<HelixChatMessage>,
}

#[derive(Deserialize)]
struct HelixChatMessage {
    id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    user_image: Option<String>,
    #[serde(default)]
    message: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    badges: JsonValue,
    #[serde(default)]
    color: Option<String>,
}

impl From<HelixChatMessage> for ChatMessage {
    fn from(message: HelixChatMessage) -> Self {
        let mut metadata = JsonMap::new();
        metadata.insert("user_id".into(), JsonValue::from(message.user_id));
        metadata.insert("badges".into(), message.badges);
        metadata.insert("color".into(), JsonValue::from(message.color));

        ChatMessage {
            external_id: message.id,
            author_name: message.user_name,
            author_avatar: message.user_image,
            text: message.message,
            published_at: message.created_at,
            metadata,
        }
    }
}

/// Twitch Helix chat messages of a broadcaster.
pub struct TwitchChat {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl TwitchChat {
    pub fn new(client: reqwest::Client, base_url: Option<&str>, client_id: &str) -> Self {
        Self {
            client,
            base_url: api_base(base_url, DEFAULT_API_BASE),
            client_id: client_id.to_string(),
        }
    }
}

#[async_trait]
impl ChatGateway for TwitchChat {
    fn platform(&self) -> ChatPlatform {
        ChatPlatform::Twitch
    }

    async fn fetch_messages(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let request = self
            .client
            .get(format!("{}/helix/chat/messages", self.base_url))
            .query(&[("broadcaster_id", channel_id), ("first", PAGE_SIZE)])
            .bearer_auth(access_token)
            .header("Client-Id", &self.client_id);

        let response: HelixResponse = fetch_json(self.platform(), request).await?;
        Ok(response.data.into_iter().map(ChatMessage::from).collect())
    }
}
