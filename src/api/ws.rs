use super::middleware::Caller;
use crate::AppState;
use crate::comments::CommentEvent;
use crate::error::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path as AxumPath};
use axum::response::Response;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Upgrades to a WebSocket that receives the stream's comment events as
/// `{"event": ..., "data": ...}` text frames.
pub async fn comments_ws(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    state.streams.get(caller.id(), stream_id).await?;
    // subscribe before the upgrade so nothing published meanwhile is missed
    let events = state.comments.hub().subscribe(stream_id);
    Ok(ws.on_upgrade(move |socket| forward_events(socket, stream_id, events)))
}

async fn forward_events(
    mut socket: WebSocket,
    stream_id: Uuid,
    events: impl Stream<Item = Arc<CommentEvent>>,
) {
    info!(%stream_id, "Comment subscriber connected");
    let mut events = std::pin::pin!(events);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                let text = match serde_json::to_string(&*event) {
                    Ok(text) => text,
                    Err(error) => {
                        error!(%stream_id, ?error, "Failed to serialize comment event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(message)) => debug!(%stream_id, ?message, "Ignoring client message"),
            }
        }
    }

    info!(%stream_id, "Comment subscriber disconnected");
}
