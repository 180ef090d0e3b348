pub mod registry;
pub mod scheduler;

pub use registry::{PollingJob, PollingRegistry, Ticket};
pub use scheduler::{IngestionScheduler, StartOutcome};

use crate::error::{Result, ServiceError};
use crate::model::ChatPlatform;
use crate::store::StreamStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The per-platform schedulers behind the ingestion endpoints.
#[derive(Clone)]
pub struct IngestionService {
    streams: StreamStore,
    schedulers: Arc<BTreeMap<ChatPlatform, IngestionScheduler>>,
}

impl IngestionService {
    pub fn new(streams: StreamStore, schedulers: impl IntoIterator<Item = IngestionScheduler>) -> Self {
        let schedulers = schedulers
            .into_iter()
            .map(|scheduler| (scheduler.platform(), scheduler))
            .collect();
        Self {
            streams,
            schedulers: Arc::new(schedulers),
        }
    }

    fn scheduler(&self, platform: ChatPlatform) -> Result<&IngestionScheduler> {
        self.schedulers
            .get(&platform)
            .ok_or_else(|| ServiceError::InvalidInput(format!("Ingestion from {platform} is not configured")))
    }

    pub async fn start(
        &self,
        user_id: &str,
        stream_id: Uuid,
        platform: ChatPlatform,
        channel_id: &str,
    ) -> Result<StartOutcome> {
        self.streams.owned_stream(stream_id, user_id).await?;
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(ServiceError::InvalidInput("channel_id is empty".into()));
        }
        let scheduler = self.scheduler(platform)?;
        let outcome = scheduler.start_polling(stream_id, user_id, channel_id).await;

        // A delete that ran while the job was being claimed has already
        // stopped this stream's jobs, so drop the new one here.
        if outcome == StartOutcome::Started && self.streams.stream(stream_id).await.is_none() {
            scheduler.stop_polling(stream_id).await;
            warn!(%stream_id, %platform, "Stream deleted while polling started");
            return Err(ServiceError::NotFound("Stream"));
        }
        Ok(outcome)
    }

    /// Returns `false` when the stream was not polling that platform.
    pub async fn stop(&self, user_id: &str, stream_id: Uuid, platform: ChatPlatform) -> Result<bool> {
        self.streams.owned_stream(stream_id, user_id).await?;
        Ok(self.scheduler(platform)?.stop_polling(stream_id).await)
    }

    /// Stops every platform's job of a stream. Returns how many were running.
    pub async fn stop_stream(&self, stream_id: Uuid) -> usize {
        let mut stopped = 0;
        for scheduler in self.schedulers.values() {
            if scheduler.stop_polling(stream_id).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Active jobs per platform.
    pub fn active_jobs(&self) -> BTreeMap<ChatPlatform, usize> {
        self.schedulers
            .iter()
            .map(|(platform, scheduler)| (*platform, scheduler.registry().len()))
            .collect()
    }

    pub async fn shutdown(&self) {
        for scheduler in self.schedulers.values() {
            scheduler.shutdown().await;
        }
        info!("Comment ingestion stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments::{CommentHub, CommentStore};
    use crate::credentials::{CredentialStore, OAuthConnection};
    use crate::model::Stream;
    use crate::testing::FakeChat;
    use chrono::Utc;
    use std::time::Duration;

    async fn service() -> (IngestionService, Uuid) {
        let streams = StreamStore::in_memory();
        let stream = Stream {
            id: Uuid::new_v4(),
            user_id: "owner".into(),
            title: "Stream".into(),
            description: None,
            room_name: None,
            created_at: Utc::now(),
        };
        streams.insert_stream(stream.clone()).await;

        let credentials = Arc::new(CredentialStore::without_refresh());
        let comments = CommentStore::new();
        let hub = CommentHub::new();
        let schedulers = [ChatPlatform::Youtube, ChatPlatform::Twitch].map(|platform| {
            IngestionScheduler::new(
                Arc::new(FakeChat::new(platform)),
                credentials.clone(),
                comments.clone(),
                hub.clone(),
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
        });
        (IngestionService::new(streams, schedulers), stream.id)
    }

    #[tokio::test(start_paused = true)]
    async fn stop_stream_stops_every_platform() {
        let (service, stream_id) = service().await;
        service
            .start("owner", stream_id, ChatPlatform::Youtube, "chat")
            .await
            .unwrap();
        service
            .start("owner", stream_id, ChatPlatform::Twitch, "broadcaster")
            .await
            .unwrap();
        assert_eq!(service.active_jobs()[&ChatPlatform::Twitch], 1);

        assert_eq!(service.stop_stream(stream_id).await, 2);
        assert!(service.active_jobs().values().all(|count| *count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_deleted_during_start_leaves_no_job() {
        let streams = StreamStore::in_memory();
        let stream_id = Uuid::new_v4();
        streams
            .insert_stream(Stream {
                id: stream_id,
                user_id: "owner".into(),
                title: "Stream".into(),
                description: None,
                room_name: None,
                created_at: Utc::now(),
            })
            .await;
        let credentials = CredentialStore::without_refresh();
        credentials
            .save(OAuthConnection {
                user_id: "owner".into(),
                provider: ChatPlatform::Youtube,
                access_token: "token".into(),
                refresh_token: None,
                expires_at: None,
            })
            .await;
        let chat = Arc::new(FakeChat::new(ChatPlatform::Youtube));
        let gate = chat.hold();
        let scheduler = IngestionScheduler::new(
            chat.clone(),
            Arc::new(credentials),
            CommentStore::new(),
            CommentHub::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let service = IngestionService::new(streams.clone(), [scheduler]);

        let start = tokio::spawn({
            let service = service.clone();
            async move {
                service
                    .start("owner", stream_id, ChatPlatform::Youtube, "chat")
                    .await
            }
        });
        chat.entered.notified().await;
        streams.remove_stream(stream_id).await;
        gate.notify_one();

        assert!(matches!(
            start.await.unwrap(),
            Err(ServiceError::NotFound("Stream"))
        ));
        assert_eq!(service.active_jobs()[&ChatPlatform::Youtube], 0);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn rejects_foreign_streams_and_unconfigured_platforms() {
        let (service, stream_id) = service().await;

        assert!(matches!(
            service.start("intruder", stream_id, ChatPlatform::Youtube, "c").await,
            Err(ServiceError::NotFound("Stream"))
        ));
        assert!(matches!(
            service.start("owner", stream_id, ChatPlatform::Facebook, "c").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            service.start("owner", stream_id, ChatPlatform::Youtube, "  ").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(
            !service
                .stop("owner", stream_id, ChatPlatform::Youtube)
                .await
                .unwrap()
        );
    }
}
