use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DestinationPlatform {
    Youtube,
    Facebook,
    Twitch,
    Custom,
}

/// Lifecycle of a destination.
///
/// `Pending -> Connected -> Disconnected`, with `Error` reachable from any
/// state whose gateway call failed. `Error` and `Disconnected` may be started
/// again.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    #[default]
    Pending,
    Connected,
    Disconnected,
    Error,
}

/// Transient egress bookkeeping stored alongside a destination.
///
/// Known fields are typed; anything else the caller attached at creation is
/// kept in `extra` and round-tripped untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DestinationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StreamDestination {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub platform: DestinationPlatform,
    pub rtmp_url: String,
    pub stream_key: String,
    pub status: DestinationStatus,
    #[serde(default)]
    pub metadata: DestinationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamDestination {
    pub fn new(
        stream_id: Uuid,
        platform: DestinationPlatform,
        rtmp_url: String,
        stream_key: String,
        extra: JsonMap<String, JsonValue>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            stream_id,
            platform,
            rtmp_url,
            stream_key,
            status: DestinationStatus::Pending,
            metadata: DestinationMetadata {
                extra,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn mark_connected(&mut self, job_id: String, started_at: Option<DateTime<Utc>>) {
        self.status = DestinationStatus::Connected;
        self.metadata.job_id = Some(job_id);
        self.metadata.started_at = Some(started_at.unwrap_or_else(Utc::now));
        self.metadata.stopped_at = None;
        self.metadata.error = None;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.status = DestinationStatus::Disconnected;
        self.metadata.job_id = None;
        self.metadata.stopped_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Drops `job_id` after the gateway reported it finished on its own.
    pub(crate) fn clear_ended_job(&mut self, job_id: &str, ended_at: Option<DateTime<Utc>>) {
        if self.metadata.job_id.as_deref() != Some(job_id) {
            return;
        }
        if self.status == DestinationStatus::Connected {
            self.status = DestinationStatus::Disconnected;
        }
        self.metadata.job_id = None;
        self.metadata.stopped_at = Some(ended_at.unwrap_or_else(Utc::now));
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_error(&mut self, message: String) {
        self.status = DestinationStatus::Error;
        self.metadata.error = Some(message);
        self.updated_at = Utc::now();
    }
}

/// Public view of a destination. The stream key is write-only.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DestinationView {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub platform: DestinationPlatform,
    pub rtmp_url: String,
    pub status: DestinationStatus,
    pub metadata: DestinationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StreamDestination> for DestinationView {
    fn from(destination: StreamDestination) -> Self {
        Self {
            id: destination.id,
            stream_id: destination.stream_id,
            platform: destination.platform,
            rtmp_url: destination.rtmp_url,
            status: destination.status,
            metadata: destination.metadata,
            created_at: destination.created_at,
            updated_at: destination.updated_at,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Stream {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Chat platforms comments can be ingested from.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChatPlatform {
    Youtube,
    Twitch,
    Facebook,
}

impl ChatPlatform {
    pub const ALL: [ChatPlatform; 3] = [
        ChatPlatform::Youtube,
        ChatPlatform::Twitch,
        ChatPlatform::Facebook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatPlatform::Youtube => "youtube",
            ChatPlatform::Twitch => "twitch",
            ChatPlatform::Facebook => "facebook",
        }
    }
}

impl fmt::Display for ChatPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChatPlatform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unsupported platform '{s}'"))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Flagged,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct IngestedComment {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub source: ChatPlatform,
    pub external_id: String,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_image: Option<String>,
    pub text: String,
    pub status: CommentStatus,
    /// Time the platform reports the message was posted.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}
