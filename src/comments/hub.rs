use crate::model::IngestedComment;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Slow subscribers that fall this far behind skip events.
const HUB_CAPACITY: usize = 1024;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum CommentEvent {
    NewComment(IngestedComment),
    CommentUpdated(IngestedComment),
    CommentDeleted { stream_id: Uuid, comment_id: Uuid },
}

impl CommentEvent {
    pub fn stream_id(&self) -> Uuid {
        match self {
            CommentEvent::NewComment(comment) | CommentEvent::CommentUpdated(comment) => {
                comment.stream_id
            }
            CommentEvent::CommentDeleted { stream_id, .. } => *stream_id,
        }
    }
}

/// Fan-out of comment events. One channel for all streams; subscribers
/// filter by stream id.
#[derive(Clone)]
pub struct CommentHub {
    sender: broadcast::Sender<Arc<CommentEvent>>,
}

impl Default for CommentHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: CommentEvent) {
        let stream_id = event.stream_id();
        // no subscribers is not an error
        if let Ok(receivers) = self.sender.send(Arc::new(event)) {
            debug!(%stream_id, receivers, "Comment event published");
        }
    }

    /// Events of one stream, in publish order.
    pub fn subscribe(&self, stream_id: Uuid) -> impl Stream<Item = Arc<CommentEvent>> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| async move {
            match item {
                Ok(event) if event.stream_id() == stream_id => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%stream_id, skipped, "Comment subscriber lagged");
                    None
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
