use super::registry::{PollingRegistry, Ticket};
use crate::chat::{ChatGateway, ChatMessage};
use crate::comments::{CommentEvent, CommentHub, CommentStore, NewComment, Upsert};
use crate::credentials::CredentialProvider;
use crate::error::{GatewayError, ServiceError};
use crate::model::ChatPlatform;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyPolling,
}

/// What one job polls, and on whose behalf.
#[derive(Clone, Debug)]
struct PollTarget {
    ticket: Ticket,
    user_id: String,
    channel_id: String,
}

struct SchedulerInner {
    platform: ChatPlatform,
    gateway: Arc<dyn ChatGateway>,
    credentials: Arc<dyn CredentialProvider>,
    comments: CommentStore,
    hub: CommentHub,
    registry: PollingRegistry,
    interval: Duration,
    call_timeout: Duration,
}

/// Runs one fetch/dedupe/publish loop per stream against a single chat
/// platform.
#[derive(Clone)]
pub struct IngestionScheduler {
    inner: Arc<SchedulerInner>,
}

impl IngestionScheduler {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        credentials: Arc<dyn CredentialProvider>,
        comments: CommentStore,
        hub: CommentHub,
        interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                platform: gateway.platform(),
                gateway,
                credentials,
                comments,
                hub,
                registry: PollingRegistry::new(),
                interval,
                call_timeout,
            }),
        }
    }

    pub fn platform(&self) -> ChatPlatform {
        self.inner.platform
    }

    pub fn registry(&self) -> &PollingRegistry {
        &self.inner.registry
    }

    /// Starts polling `channel_id` for the stream. The first cycle runs
    /// before this returns; later cycles run every interval.
    pub async fn start_polling(
        &self,
        stream_id: Uuid,
        user_id: &str,
        channel_id: &str,
    ) -> StartOutcome {
        let platform = self.inner.platform;
        let Some(ticket) = self.inner.registry.claim(stream_id) else {
            warn!(%stream_id, %platform, "Already polling for stream");
            return StartOutcome::AlreadyPolling;
        };
        info!(%stream_id, %platform, channel_id, interval = ?self.inner.interval, "Starting comment polling");

        let target = PollTarget {
            ticket: ticket.clone(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        };
        self.inner.run_cycle(&target).await;

        let handle = tokio::spawn(self.inner.clone().poll_loop(target));
        if !self.inner.registry.attach(&ticket, handle) {
            debug!(%stream_id, %platform, "Polling stopped during its first cycle");
        }
        StartOutcome::Started
    }

    /// Stops the stream's job and waits for its loop to exit. Returns
    /// `false` if nothing was polling.
    pub async fn stop_polling(&self, stream_id: Uuid) -> bool {
        let Some(job) = self.inner.registry.remove(stream_id) else {
            return false;
        };
        if let Some(handle) = job.handle
            && let Err(error) = handle.await
        {
            error!(%stream_id, platform = %self.inner.platform, ?error, "Polling task failed");
        }
        info!(%stream_id, platform = %self.inner.platform, "Stopped comment polling");
        true
    }

    /// Stops every job of this platform.
    pub async fn shutdown(&self) {
        let jobs = self.inner.registry.drain();
        let count = jobs.len();
        for handle in jobs.into_iter().filter_map(|job| job.handle) {
            _ = handle.await;
        }
        info!(platform = %self.inner.platform, count, "Comment polling shut down");
    }
}

impl SchedulerInner {
    async fn poll_loop(self: Arc<Self>, target: PollTarget) {
        let cancel = target.ticket.cancel.clone();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.run_cycle(&target) => {}
            }
        }
        debug!(stream_id = %target.ticket.stream_id, platform = %self.platform, "Polling loop exited");
    }

    /// One fetch cycle. Failures are logged and the job keeps running.
    async fn run_cycle(&self, target: &PollTarget) {
        let stream_id = target.ticket.stream_id;
        match self.fetch_cycle(target).await {
            Ok(0) => {}
            Ok(created) => debug!(%stream_id, platform = %self.platform, created, "Ingested new comments"),
            Err(ServiceError::Credential(error)) => {
                warn!(%stream_id, platform = %self.platform, %error, "No usable credential, skipping poll cycle");
            }
            Err(error) => {
                error!(%stream_id, platform = %self.platform, %error, "Error polling comments");
            }
        }
    }

    async fn fetch_cycle(&self, target: &PollTarget) -> Result<usize, ServiceError> {
        let token = self
            .credentials
            .valid_access_token(&target.user_id, self.platform)
            .await?;

        let messages = timeout(
            self.call_timeout,
            self.gateway.fetch_messages(&token, &target.channel_id),
        )
        .await
        .map_err(|_| GatewayError::Timeout)??;

        let stream_id = target.ticket.stream_id;
        let created = self
            .registry
            .with_active(&target.ticket, || self.store_and_publish(stream_id, messages));

        match created {
            Some(created) => Ok(created),
            None => {
                debug!(%stream_id, platform = %self.platform, "Discarding results of a stopped job");
                Ok(0)
            }
        }
    }

    fn store_and_publish(&self, stream_id: Uuid, messages: Vec<ChatMessage>) -> usize {
        let mut created = 0;
        for message in messages {
            let comment = NewComment {
                stream_id,
                source: self.platform,
                external_id: message.external_id,
                author_name: message.author_name,
                author_image: message.author_avatar,
                text: message.text,
                timestamp: message.published_at,
                metadata: message.metadata,
            };
            if let Upsert::Created(stored) = self.comments.upsert(comment) {
                self.hub.publish(CommentEvent::NewComment(stored));
                created += 1;
            }
        }
        created
    }
}
