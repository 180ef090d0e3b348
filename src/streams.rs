use crate::comments::CommentService;
use crate::coordinator::DestinationCoordinator;
use crate::error::{Result, ServiceError};
use crate::ingest::IngestionService;
use crate::model::Stream;
use crate::store::StreamStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewStream {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_create_room")]
    pub create_room: bool,
}

fn default_create_room() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
    /// Remote cleanup that failed; the stream is deleted regardless.
    pub warnings: Vec<String>,
}

/// `stream-<unix millis>-<8 hex chars>`
fn room_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("stream-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Streams and the cleanup that has to happen when one goes away.
#[derive(Clone)]
pub struct StreamService {
    store: StreamStore,
    coordinator: DestinationCoordinator,
    ingestion: IngestionService,
    comments: CommentService,
}

impl StreamService {
    pub fn new(
        store: StreamStore,
        coordinator: DestinationCoordinator,
        ingestion: IngestionService,
        comments: CommentService,
    ) -> Self {
        Self {
            store,
            coordinator,
            ingestion,
            comments,
        }
    }

    pub async fn create(&self, user_id: &str, request: NewStream) -> Result<Stream> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(ServiceError::InvalidInput("title is empty".into()));
        }

        let stream = Stream {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            description: request.description,
            room_name: request.create_room.then(room_name),
            created_at: Utc::now(),
        };
        info!(stream_id = %stream.id, user_id, room_name = ?stream.room_name, "Stream created");
        self.store.insert_stream(stream.clone()).await;
        Ok(stream)
    }

    pub async fn list(&self, user_id: &str) -> Vec<Stream> {
        self.store.streams_of(user_id).await
    }

    pub async fn get(&self, user_id: &str, stream_id: Uuid) -> Result<Stream> {
        self.store.owned_stream(stream_id, user_id).await
    }

    /// Stops the stream's egress and polling jobs, then deletes it with its
    /// destinations and comments.
    pub async fn delete(&self, user_id: &str, stream_id: Uuid) -> Result<DeleteOutcome> {
        self.store.owned_stream(stream_id, user_id).await?;

        let warnings = self.coordinator.stop_all(stream_id).await;
        let polling = self.ingestion.stop_stream(stream_id).await;
        if !warnings.is_empty() {
            warn!(%stream_id, failures = warnings.len(), "Deleting stream with egress jobs that did not stop");
        }

        let destinations = self
            .store
            .remove_stream(stream_id)
            .await
            .map(|(_, destinations)| destinations.len())
            .unwrap_or_default();
        // Catches a polling start that slipped in between the first stop
        // and the removal.
        let polling = polling + self.ingestion.stop_stream(stream_id).await;
        let comments = self.comments.purge_stream(stream_id);
        info!(%stream_id, destinations, comments, polling, "Stream deleted");

        Ok(DeleteOutcome {
            deleted: true,
            warnings,
        })
    }
}
