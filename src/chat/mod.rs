//! Platform chat APIs, normalized behind one [`ChatGateway`] capability.

pub mod facebook;
pub mod twitch;
pub mod youtube;

use crate::error::GatewayError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

pub use facebook::FacebookChat;
pub use twitch::TwitchChat;
pub use youtube::YouTubeChat;

/// A chat message as fetched from a platform, before it is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub external_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub metadata: JsonMap<String, JsonValue>,
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    fn platform(&self) -> ChatPlatform;

    /// Fetches the most recent messages of a channel, video or broadcast.
    async fn fetch_messages(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<Vec<ChatMessage>, GatewayError>;
}

/// Sends `request` and decodes a JSON body, mapping non-2xx responses onto
/// [`GatewayError`].
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    platform: ChatPlatform,
    request: RequestBuilder,
) -> Result<T, GatewayError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = response.text().await.unwrap_or_default();
    warn!(%platform, %status, message, "Chat API error");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        _ => GatewayError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

pub(crate) fn api_base(configured: Option<&str>, default: &str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}
