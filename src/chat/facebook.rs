use super::{ChatGateway, ChatMessage, api_base, fetch_json};
use crate::error::GatewayError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com";
const GRAPH_VERSION: &str = "v18.0";
const FIELDS: &str = "id,from,message,created_time,parent";

#[derive(Deserialize)]
struct CommentPage {
    #[serde(default)]
    data: Vec<GraphComment>,
}

#[derive(Deserialize)]
struct GraphComment {
    id: String,
    #[serde(default)]
    from: Option<GraphUser>,
    #[serde(default)]
    message: String,
    #[serde(deserialize_with = "graph_time")]
    created_time: DateTime<Utc>,
    #[serde(default)]
    parent: Option<GraphRef>,
}

#[derive(Deserialize)]
struct GraphUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: Option<GraphPicture>,
}

#[derive(Deserialize)]
struct GraphPicture {
    data: GraphPictureData,
}

#[derive(Deserialize)]
struct GraphPictureData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct GraphRef {
    id: String,
}

/// Graph API times look like `2024-01-01T12:00:00+0000`.
fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn graph_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let value = String::deserialize(deserializer)?;
    parse_graph_time(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid Graph API time '{value}'")))
}

impl From<GraphComment> for ChatMessage {
    fn from(comment: GraphComment) -> Self {
        let (from_id, author_name, author_avatar) = match comment.from {
            Some(user) => (
                Some(user.id),
                user.name,
                user.picture.and_then(|p| p.data.url),
            ),
            None => (None, String::new(), None),
        };

        let mut metadata = JsonMap::new();
        metadata.insert("from_id".into(), JsonValue::from(from_id));
        metadata.insert(
            "parent_id".into(),
            JsonValue::from(comment.parent.map(|p| p.id)),
        );

        ChatMessage {
            external_id: comment.id,
            author_name,
            author_avatar,
            text: comment.message,
            published_at: comment.created_time,
            metadata,
        }
    }
}

/// Comments on a Facebook live video, read through the Graph API.
pub struct FacebookChat {
    client: reqwest::Client,
    base_url: String,
}

impl FacebookChat {
    pub fn new(client: reqwest::Client, base_url: Option<&str>) -> Self {
        Self {
            client,
            base_url: api_base(base_url, DEFAULT_GRAPH_BASE),
        }
    }
}

#[async_trait]
impl ChatGateway for FacebookChat {
    fn platform(&self) -> ChatPlatform {
        ChatPlatform::Facebook
    }

    async fn fetch_messages(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let request = self
            .client
            .get(format!(
                "{}/{GRAPH_VERSION}/{channel_id}/comments",
                self.base_url
            ))
            .query(&[
                ("access_token", access_token),
                ("fields", FIELDS),
                ("filter", "stream"),
                ("limit", "100"),
            ]);

        let page: CommentPage = fetch_json(self.platform(), request).await?;
        Ok(page.data.into_iter().map(ChatMessage::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_graph_and_rfc3339_times() {
        let graph = parse_graph_time("2024-01-01T12:00:00+0000").unwrap();
        let rfc = parse_graph_time("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(graph, rfc);
        assert_eq!(graph.timestamp(), 1_704_110_400);
        assert!(parse_graph_time("yesterday").is_none());
    }

    #[test]
    fn normalizes_comment_page() {
        let raw = r#"{
            "data": [
                {
                    "id": "fb-1",
                    "from": {
                        "id": "100",
                        "name": "Fan",
                        "picture": {"data": {"url": "https://cdn.fb/p.jpg"}}
                    },
                    "message": "first!",
                    "created_time": "2024-01-01T12:00:00+0000"
                },
                {
                    "id": "fb-2",
                    "message": "reply without author",
                    "created_time": "2024-01-01T12:00:05+0000",
                    "parent": {"id": "fb-1"}
                }
            ],
            "paging": {}
        }"#;
        let page: CommentPage = serde_json::from_str(raw).unwrap();
        let messages: Vec<ChatMessage> = page.data.into_iter().map(Into::into).collect();

        assert_eq!(messages[0].author_name, "Fan");
        assert_eq!(messages[0].author_avatar.as_deref(), Some("https://cdn.fb/p.jpg"));
        assert_eq!(messages[0].metadata["from_id"], "100");
        assert!(messages[0].metadata["parent_id"].is_null());

        assert_eq!(messages[1].author_name, "");
        assert_eq!(messages[1].metadata["parent_id"], "fb-1");
        assert!(messages[1].published_at > messages[0].published_at);
    }
}
