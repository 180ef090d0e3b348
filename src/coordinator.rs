use crate::egress::{EgressGateway, EgressRegistry, EgressRequest, StopConflict};
use crate::error::{GatewayError, Result, ServiceError};
use crate::model::{DestinationPlatform, StreamDestination};
use crate::store::StreamStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewDestination {
    pub platform: DestinationPlatform,
    pub rtmp_url: String,
    pub stream_key: String,
    #[serde(default)]
    pub metadata: JsonMap<String, serde_json::Value>,
}

/// Health of a destination's egress job, as reported by the gateway.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct EgressHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EgressHealth {
    pub fn inactive() -> Self {
        Self {
            status: "inactive".into(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoveOutcome {
    pub deleted: bool,
    /// Set when the destination had a job that could not be stopped.
    pub stop_error: Option<String>,
}

/// Drives destinations through their egress lifecycle and keeps the
/// destination-to-job mapping.
#[derive(Clone)]
pub struct DestinationCoordinator {
    store: StreamStore,
    gateway: Arc<dyn EgressGateway>,
    registry: EgressRegistry,
    call_timeout: Duration,
}

impl DestinationCoordinator {
    pub fn new(store: StreamStore, gateway: Arc<dyn EgressGateway>, call_timeout: Duration) -> Self {
        Self {
            store,
            gateway,
            registry: EgressRegistry::new(),
            call_timeout,
        }
    }

    pub fn registry(&self) -> &EgressRegistry {
        &self.registry
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        stream_id: Uuid,
        request: NewDestination,
    ) -> Result<StreamDestination> {
        self.store.owned_stream(stream_id, user_id).await?;

        let url = reqwest::Url::parse(&request.rtmp_url)
            .map_err(|error| ServiceError::InvalidInput(format!("rtmp_url: {error}")))?;
        if !matches!(url.scheme(), "rtmp" | "rtmps") {
            return Err(ServiceError::InvalidInput(
                "rtmp_url must use the rtmp:// or rtmps:// scheme".into(),
            ));
        }
        if request.stream_key.trim().is_empty() {
            return Err(ServiceError::InvalidInput("stream_key is empty".into()));
        }

        let destination = StreamDestination::new(
            stream_id,
            request.platform,
            request.rtmp_url,
            request.stream_key,
            request.metadata,
        );
        info!(%stream_id, destination_id = %destination.id, platform = ?destination.platform, "Destination created");
        self.store.insert_destination(destination.clone()).await;
        Ok(destination)
    }

    pub async fn list(&self, user_id: &str, stream_id: Uuid) -> Result<Vec<StreamDestination>> {
        self.store.owned_stream(stream_id, user_id).await?;
        Ok(self.store.destinations(stream_id).await)
    }

    pub async fn get(
        &self,
        user_id: &str,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<StreamDestination> {
        self.store.owned_stream(stream_id, user_id).await?;
        self.store.destination(stream_id, destination_id).await
    }

    /// Starts publishing the stream's room to the destination.
    pub async fn start(
        &self,
        user_id: &str,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<StreamDestination> {
        let stream = self.store.owned_stream(stream_id, user_id).await?;
        let current = self.store.destination(stream_id, destination_id).await?;
        let Some(room_name) = stream.room_name.as_deref() else {
            return Err(ServiceError::InvalidState(
                "Stream has no media room assigned".into(),
            ));
        };

        let known_job = self
            .registry
            .active_job(destination_id)
            .or(current.metadata.job_id);
        if let Some(job_id) = known_job {
            self.reclaim_ended_job(destination_id, &job_id).await?;
        }

        let Some(reservation) = self.registry.reserve_start(destination_id) else {
            warn!(%destination_id, "Destination already has an egress job or operation in flight");
            return Err(ServiceError::AlreadyRunning);
        };

        // the registry is empty after a restart, the persisted job id is not
        let destination = self.store.destination(stream_id, destination_id).await?;
        if let Some(job_id) = &destination.metadata.job_id {
            warn!(%destination_id, job_id, "Destination has a persisted egress job");
            return Err(ServiceError::AlreadyRunning);
        }

        let request = EgressRequest {
            room_name,
            rtmp_url: &destination.rtmp_url,
            stream_key: &destination.stream_key,
        };
        let info = match self.with_timeout(self.gateway.start_egress(request)).await {
            Ok(info) => info,
            Err(error) => {
                error!(%destination_id, %error, "Failed to start egress");
                let message = error.to_string();
                self.store
                    .update_destination(destination_id, |d| d.mark_error(message))
                    .await;
                return Err(error.into());
            }
        };

        let job_id = info.job_id.clone();
        reservation.commit(job_id.clone());
        info!(%stream_id, %destination_id, job_id, room_name, "Egress started");

        let updated = self
            .store
            .update_destination(destination_id, |d| {
                d.mark_connected(job_id.clone(), info.started_at)
            })
            .await;
        match updated {
            Some(destination) => Ok(destination),
            None => {
                warn!(%destination_id, job_id, "Destination removed while starting, stopping orphaned egress");
                if let Err(error) = self.with_timeout(self.gateway.stop_egress(&job_id)).await {
                    error!(job_id, %error, "Failed to stop orphaned egress");
                }
                self.registry.forget(destination_id);
                Err(ServiceError::NotFound("Destination"))
            }
        }
    }

    /// Frees a destination whose job is no longer running on the gateway.
    /// Fails with `AlreadyRunning` while the job is live or its state cannot
    /// be confirmed.
    async fn reclaim_ended_job(&self, destination_id: Uuid, job_id: &str) -> Result<()> {
        let ended_at = match self.with_timeout(self.gateway.egress_status(job_id)).await {
            Ok(info) if info.has_ended() => info.ended_at,
            Err(GatewayError::NotFound(_)) => None,
            Ok(info) => {
                warn!(%destination_id, job_id, status = %info.status, "Destination already has a running egress job");
                return Err(ServiceError::AlreadyRunning);
            }
            Err(error) => {
                warn!(%destination_id, job_id, %error, "Could not confirm egress job state");
                return Err(ServiceError::AlreadyRunning);
            }
        };

        if !self.registry.release_ended(destination_id, job_id) {
            return Err(ServiceError::AlreadyRunning);
        }
        self.store
            .update_destination(destination_id, |d| d.clear_ended_job(job_id, ended_at))
            .await;
        info!(%destination_id, job_id, "Egress job ended remotely, destination freed");
        Ok(())
    }

    /// Stops the destination's active egress job.
    pub async fn stop(
        &self,
        user_id: &str,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<StreamDestination> {
        self.store.owned_stream(stream_id, user_id).await?;
        let destination = self.store.destination(stream_id, destination_id).await?;
        self.stop_job(&destination).await
    }

    async fn stop_job(&self, destination: &StreamDestination) -> Result<StreamDestination> {
        let destination_id = destination.id;
        let reservation = self
            .registry
            .reserve_stop(destination_id, destination.metadata.job_id.as_deref())
            .map_err(|conflict| match conflict {
                StopConflict::NoActiveJob => ServiceError::NoActiveJob,
                StopConflict::Busy => ServiceError::InvalidState(
                    "Another start or stop is in progress for this destination".into(),
                ),
            })?;
        let job_id = reservation.job_id().to_string();

        match self.with_timeout(self.gateway.stop_egress(&job_id)).await {
            Ok(_) => {
                reservation.complete();
                info!(%destination_id, job_id, "Egress stopped");
                self.store
                    .update_destination(destination_id, |d| d.mark_disconnected())
                    .await
                    .ok_or(ServiceError::NotFound("Destination"))
            }
            Err(error) => {
                error!(%destination_id, job_id, %error, "Failed to stop egress");
                let message = error.to_string();
                let job_gone =
                    matches!(error, GatewayError::NotFound(_) | GatewayError::JobEnded(_));
                if job_gone {
                    // the job is unknown or already over, nothing is left to stop
                    reservation.complete();
                } else {
                    drop(reservation);
                }
                self.store
                    .update_destination(destination_id, |d| {
                        if job_gone {
                            d.metadata.job_id = None;
                        }
                        d.mark_error(message);
                    })
                    .await;
                Err(error.into())
            }
        }
    }

    fn has_job(&self, destination: &StreamDestination) -> bool {
        self.registry.slot(destination.id).is_some() || destination.metadata.job_id.is_some()
    }

    /// Stops any active job, then deletes the destination. A failed stop
    /// does not block the delete; it is reported in the outcome.
    pub async fn remove(
        &self,
        user_id: &str,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<RemoveOutcome> {
        self.store.owned_stream(stream_id, user_id).await?;
        let destination = self.store.destination(stream_id, destination_id).await?;

        let stop_error = if self.has_job(&destination) {
            self.stop_job(&destination)
                .await
                .inspect_err(|error| warn!(%destination_id, %error, "Deleting destination whose egress did not stop"))
                .err()
                .map(|error| error.to_string())
        } else {
            None
        };

        self.registry.forget(destination_id);
        self.store.remove_destination(destination_id).await;
        info!(%stream_id, %destination_id, "Destination removed");

        Ok(RemoveOutcome {
            deleted: true,
            stop_error,
        })
    }

    /// Reports the gateway's view of the destination's job. Never mutates
    /// the destination.
    pub async fn health(
        &self,
        user_id: &str,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<EgressHealth> {
        self.store.owned_stream(stream_id, user_id).await?;
        let destination = self.store.destination(stream_id, destination_id).await?;

        let Some(job_id) = self
            .registry
            .active_job(destination_id)
            .or(destination.metadata.job_id)
        else {
            return Ok(EgressHealth::inactive());
        };

        Ok(
            match self.with_timeout(self.gateway.egress_status(&job_id)).await {
                Ok(info) => EgressHealth {
                    status: info.status,
                    started_at: info.started_at,
                    ended_at: info.ended_at,
                    error: info.error,
                },
                Err(error) => EgressHealth {
                    status: "error".into(),
                    started_at: None,
                    ended_at: None,
                    error: Some(error.to_string()),
                },
            },
        )
    }

    /// Stops every active job of a stream. Returns one message per
    /// destination that failed to stop.
    pub async fn stop_all(&self, stream_id: Uuid) -> Vec<String> {
        let mut failures = Vec::new();
        for destination in self.store.destinations(stream_id).await {
            if !self.has_job(&destination) {
                continue;
            }
            if let Err(error) = self.stop_job(&destination).await {
                warn!(%stream_id, destination_id = %destination.id, %error, "Failed to stop egress during stream cleanup");
                failures.push(format!("destination {}: {error}", destination.id));
            }
            self.registry.forget(destination.id);
        }
        failures
    }
}
