use super::{ChatGateway, ChatMessage, api_base, fetch_json};
use crate::error::GatewayError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
const MAX_RESULTS: &str = "200";

#[derive(Deserialize)]
struct LiveChatResponse {
    #[serde(default)]
    items: Vec<LiveChatItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatItem {
    id: String,
    snippet: Snippet,
    author_details: AuthorDetails,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    published_at: DateTime<Utc>,
    #[serde(default)]
    display_message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    profile_image_url: Option<String>,
    #[serde(default)]
    is_chat_owner: bool,
    #[serde(default)]
    is_chat_moderator: bool,
}

impl From<LiveChatItem> for ChatMessage {
    fn from(item: LiveChatItem) -> Self {
        let author = item.author_details;
        let mut metadata = JsonMap::new();
        metadata.insert("channel_id".into(), JsonValue::from(author.channel_id));
        metadata.insert("is_chat_owner".into(), JsonValue::from(author.is_chat_owner));
        metadata.insert(
            "is_chat_moderator".into(),
            JsonValue::from(author.is_chat_moderator),
        );

        ChatMessage {
            external_id: item.id,
            author_name: author.display_name,
            author_avatar: author.profile_image_url,
            text: item.snippet.display_message,
            published_at: item.snippet.published_at,
            metadata,
        }
    }
}

/// YouTube Data API live chat, polled by live chat id.
pub struct YouTubeChat {
    client: reqwest::Client,
    base_url: String,
}

impl YouTubeChat {
    pub fn new(client: reqwest::Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: api_base(base_url, DEFAULT_API_BASE),
        }
    }
}

#[async_trait]
impl ChatGateway for YouTubeChat {
    fn platform(&self) -> ChatPlatform {
        ChatPlatform::Youtube
    }

    async fn fetch_messages(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let request = self
            .client
            .get(format!("{}/youtube/v3/liveChat/messages", self.base_url))
            .query(&[
                ("liveChatId", channel_id),
                ("part", "snippet,authorDetails"),
                ("maxResults", MAX_RESULTS),
            ])
            .bearer_auth(access_token);

        let response: LiveChatResponse = fetch_json(self.platform(), request).await?;
        Ok(response.items.into_iter().map(ChatMessage::from).collect())
    }
}
