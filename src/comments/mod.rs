pub mod hub;
pub mod store;

pub use hub::{CommentEvent, CommentHub};
pub use store::{CommentQuery, CommentStore, NewComment, Upsert};

use crate::error::{Result, ServiceError};
use crate::model::{CommentStatus, IngestedComment};
use crate::store::StreamStore;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Moderation and queries over ingested comments. Every change is published
/// on the hub.
#[derive(Clone)]
pub struct CommentService {
    streams: StreamStore,
    store: CommentStore,
    hub: CommentHub,
}

impl CommentService {
    pub fn new(streams: StreamStore, store: CommentStore, hub: CommentHub) -> Self {
        Self {
            streams,
            store,
            hub,
        }
    }

    pub fn hub(&self) -> &CommentHub {
        &self.hub
    }

    pub async fn list(
        &self,
        user_id: &str,
        stream_id: Uuid,
        query: &CommentQuery,
    ) -> Result<Vec<IngestedComment>> {
        self.streams.owned_stream(stream_id, user_id).await?;
        Ok(self.store.list(stream_id, query))
    }

    pub async fn recent_since(
        &self,
        user_id: &str,
        stream_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<IngestedComment>> {
        self.streams.owned_stream(stream_id, user_id).await?;
        Ok(self.store.recent_since(stream_id, since))
    }

    pub async fn update_status(
        &self,
        user_id: &str,
        stream_id: Uuid,
        comment_id: Uuid,
        status: CommentStatus,
    ) -> Result<IngestedComment> {
        self.streams.owned_stream(stream_id, user_id).await?;
        let comment = self
            .store
            .update_status(stream_id, comment_id, status)
            .ok_or(ServiceError::NotFound("Comment"))?;
        info!(%stream_id, %comment_id, ?status, "Comment moderated");
        self.hub.publish(CommentEvent::CommentUpdated(comment.clone()));
        Ok(comment)
    }

    pub async fn bulk_update_status(
        &self,
        user_id: &str,
        stream_id: Uuid,
        comment_ids: &[Uuid],
        status: CommentStatus,
    ) -> Result<Vec<IngestedComment>> {
        self.streams.owned_stream(stream_id, user_id).await?;
        let updated = self.store.bulk_update_status(stream_id, comment_ids, status);
        info!(%stream_id, requested = comment_ids.len(), updated = updated.len(), ?status, "Comments moderated");
        for comment in &updated {
            self.hub.publish(CommentEvent::CommentUpdated(comment.clone()));
        }
        Ok(updated)
    }

    pub async fn delete(&self, user_id: &str, stream_id: Uuid, comment_id: Uuid) -> Result<()> {
        self.streams.owned_stream(stream_id, user_id).await?;
        self.store
            .delete(stream_id, comment_id)
            .ok_or(ServiceError::NotFound("Comment"))?;
        info!(%stream_id, %comment_id, "Comment deleted");
        self.hub.publish(CommentEvent::CommentDeleted {
            stream_id,
            comment_id,
        });
        Ok(())
    }

    /// Drops the comments of a deleted stream.
    pub fn purge_stream(&self, stream_id: Uuid) -> usize {
        self.store.remove_stream(stream_id)
    }
}
