pub mod livekit;
pub mod registry;

use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use livekit::LiveKitEgressClient;
pub use registry::{EgressRegistry, Slot, StartReservation, StopConflict, StopReservation};

/// What to publish and where.
#[derive(Clone, Debug)]
pub struct EgressRequest<'a> {
    pub room_name: &'a str,
    pub rtmp_url: &'a str,
    pub stream_key: &'a str,
}

/// Remote egress job as reported by the gateway.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct EgressInfo {
    pub job_id: String,
    pub room_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EgressInfo {
    /// Whether the job has stopped publishing for good.
    pub fn has_ended(&self) -> bool {
        matches!(
            self.status.as_str(),
            "EGRESS_COMPLETE" | "EGRESS_FAILED" | "EGRESS_ABORTED" | "EGRESS_LIMIT_REACHED"
        )
    }
}

/// Starts, stops and inspects room-composite RTMP jobs on a remote service.
#[async_trait]
pub trait EgressGateway: Send + Sync {
    async fn start_egress(&self, request: EgressRequest<'_>) -> Result<EgressInfo, GatewayError>;

    async fn stop_egress(&self, job_id: &str) -> Result<EgressInfo, GatewayError>;

    async fn egress_status(&self, job_id: &str) -> Result<EgressInfo, GatewayError>;
}

/// Joins an RTMP ingest URL and a stream key into the publish URL.
pub fn publish_url(rtmp_url: &str, stream_key: &str) -> String {
    let base = rtmp_url.trim_end_matches('/');
    let key = stream_key.trim_start_matches('/');
    format!("{base}/{key}")
}
