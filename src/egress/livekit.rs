use crate::egress::{EgressGateway, EgressInfo, EgressRequest, publish_url};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, error, info};

const TWIRP_PREFIX: &str = "/twirp/livekit.Egress";
const TOKEN_TTL_SECS: i64 = 600;

/// LiveKit egress statuses, indexed by their protobuf enum value.
const EGRESS_STATUSES: [&str; 7] = [
    "EGRESS_STARTING",
    "EGRESS_ACTIVE",
    "EGRESS_ENDING",
    "EGRESS_COMPLETE",
    "EGRESS_FAILED",
    "EGRESS_ABORTED",
    "EGRESS_LIMIT_REACHED",
];

#[derive(Serialize)]
struct VideoGrant {
    #[serde(rename = "roomRecord")]
    room_record: bool,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    iss: &'a str,
    nbf: i64,
    exp: i64,
    video: VideoGrant,
}

/// EgressInfo as LiveKit serializes it. Accepts both proto and JSON field
/// names, enum values as names or numbers, and int64 nanos as strings.
#[derive(Deserialize)]
struct TwirpEgressInfo {
    #[serde(alias = "egressId")]
    egress_id: String,
    #[serde(default, alias = "roomName")]
    room_name: String,
    #[serde(default)]
    status: JsonValue,
    #[serde(default, alias = "startedAt")]
    started_at: JsonValue,
    #[serde(default, alias = "endedAt")]
    ended_at: JsonValue,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
struct TwirpEgressList {
    #[serde(default)]
    items: Vec<TwirpEgressInfo>,
}

#[derive(Deserialize)]
struct TwirpError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

fn status_name(value: &JsonValue) -> String {
    match value {
        JsonValue::String(name) => name.clone(),
        JsonValue::Number(n) => n
            .as_u64()
            .and_then(|i| EGRESS_STATUSES.get(i as usize))
            .map(|s| s.to_string())
            .unwrap_or_else(|| n.to_string()),
        // proto3 omits zero values
        _ => EGRESS_STATUSES[0].to_string(),
    }
}

fn nanos_to_time(value: &JsonValue) -> Option<DateTime<Utc>> {
    let nanos = match value {
        JsonValue::String(s) => s.parse::<i64>().ok()?,
        JsonValue::Number(n) => n.as_i64()?,
        _ => return None,
    };
    (nanos > 0).then(|| DateTime::from_timestamp_nanos(nanos))
}

impl From<TwirpEgressInfo> for EgressInfo {
    fn from(info: TwirpEgressInfo) -> Self {
        EgressInfo {
            status: status_name(&info.status),
            started_at: nanos_to_time(&info.started_at),
            ended_at: nanos_to_time(&info.ended_at),
            error: (!info.error.is_empty()).then_some(info.error),
            job_id: info.egress_id,
            room_name: info.room_name,
        }
    }
}

/// Rewrites a LiveKit signalling URL into its HTTP API base.
fn http_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// [`EgressGateway`] backed by LiveKit's Twirp egress API.
#[derive(Clone)]
pub struct LiveKitEgressClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    encoding_key: EncodingKey,
    layout: String,
}

impl LiveKitEgressClient {
    pub fn new(
        url: &str,
        api_key: &str,
        api_secret: &str,
        layout: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = http_base(url);
        info!(%base_url, "LiveKit egress client configured");

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            encoding_key: EncodingKey::from_secret(api_secret.as_bytes()),
            layout: layout.to_string(),
        })
    }

    fn access_token(&self) -> Result<String, GatewayError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            iss: &self.api_key,
            nbf: now,
            exp: now + TOKEN_TTL_SECS,
            video: VideoGrant { room_record: true },
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|error| GatewayError::Auth(error.to_string()))
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        body: JsonValue,
    ) -> Result<R, GatewayError> {
        let url = format!("{}{TWIRP_PREFIX}/{method}", self.base_url);
        debug!(%url, "Calling LiveKit egress API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<R>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let twirp = serde_json::from_str::<TwirpError>(&text).ok();
        let message = twirp
            .as_ref()
            .map(|e| e.msg.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(text);
        error!(%url, %status, message, "LiveKit egress API error");

        let code = twirp.map(|e| e.code).unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => GatewayError::NotFound(message),
            _ if code == "not_found" => GatewayError::NotFound(message),
            StatusCode::PRECONDITION_FAILED => GatewayError::JobEnded(message),
            _ if code == "failed_precondition" => GatewayError::JobEnded(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth(message),
            _ => GatewayError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl EgressGateway for LiveKitEgressClient {
    async fn start_egress(&self, request: EgressRequest<'_>) -> Result<EgressInfo, GatewayError> {
        info!(room_name = request.room_name, "Starting RTMP egress");
        let body = json!({
            "room_name": request.room_name,
            "layout": self.layout,
            "stream_outputs": [{
                "protocol": "RTMP",
                "urls": [publish_url(request.rtmp_url, request.stream_key)],
            }],
        });

        let info: TwirpEgressInfo = self.call("StartRoomCompositeEgress", body).await?;
        Ok(info.into())
    }

    async fn stop_egress(&self, job_id: &str) -> Result<EgressInfo, GatewayError> {
        info!(job_id, "Stopping egress");
        let info: TwirpEgressInfo = self
            .call("StopEgress", json!({ "egress_id": job_id }))
            .await?;
        Ok(info.into())
    }

    async fn egress_status(&self, job_id: &str) -> Result<EgressInfo, GatewayError> {
        let list: TwirpEgressList = self
            .call("ListEgress", json!({ "egress_id": job_id }))
            .await?;

        list.items
            .into_iter()
            .find(|info| info.egress_id == job_id)
            .map(EgressInfo::from)
            .ok_or_else(|| GatewayError::NotFound(format!("Egress not found: {job_id}")))
    }
}
