use crate::error::{Result, ServiceError};
use crate::model::{Stream, StreamDestination};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STATE_FILE: &str = "streams.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    streams: Vec<Stream>,
    destinations: Vec<StreamDestination>,
}

#[derive(Debug, Default)]
struct StoreState {
    streams: HashMap<Uuid, Stream>,
    destinations: HashMap<Uuid, StreamDestination>,
}

impl StoreState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            streams: self.streams.values().cloned().collect(),
            destinations: self.destinations.values().cloned().collect(),
        }
    }
}

/// Streams and their destinations, snapshotted to `streams.json` after every
/// mutation so destination metadata survives a restart.
#[derive(Debug, Clone)]
pub struct StreamStore {
    path: Option<PathBuf>,
    state: Arc<TokioMutex<StoreState>>,
}

impl StreamStore {
    /// Opens the store in `workspace`, loading a previous snapshot if present.
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(workspace)?;
        let path = workspace.join(STATE_FILE);

        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<Snapshot>(&content)
                .inspect_err(|error| warn!(?error, ?path, "Failed to parse stream state file"))
                .unwrap_or_default()
        } else {
            Snapshot::default()
        };

        info!(
            streams = snapshot.streams.len(),
            destinations = snapshot.destinations.len(),
            file = %path.display(),
            "Initialize stream store"
        );

        let state = StoreState {
            streams: snapshot.streams.into_iter().map(|s| (s.id, s)).collect(),
            destinations: snapshot
                .destinations
                .into_iter()
                .map(|d| (d.id, d))
                .collect(),
        };

        Ok(Self {
            path: Some(path),
            state: Arc::new(TokioMutex::new(state)),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(TokioMutex::new(StoreState::default())),
        }
    }

    async fn save(&self, state: &StoreState) {
        let Some(path) = &self.path else {
            return;
        };

        let content = match serde_json::to_string(&state.snapshot()) {
            Ok(content) => content,
            Err(error) => {
                error!(?error, "Failed to serialize stream state");
                return;
            }
        };
        debug!(path = %path.display(), bytes = content.len(), "Saving stream state");

        let tmp = path.with_extension("json.tmp");
        let result = async {
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(error) = result {
            error!(?error, path = %path.display(), "Failed to save stream state");
        }
    }

    pub async fn insert_stream(&self, stream: Stream) {
        let mut state = self.state.lock().await;
        state.streams.insert(stream.id, stream);
        self.save(&state).await;
    }

    pub async fn stream(&self, stream_id: Uuid) -> Option<Stream> {
        self.state.lock().await.streams.get(&stream_id).cloned()
    }

    /// Looks up a stream owned by `user_id`. Streams of other users are
    /// reported as missing.
    pub async fn owned_stream(&self, stream_id: Uuid, user_id: &str) -> Result<Stream> {
        self.stream(stream_id)
            .await
            .filter(|stream| stream.user_id == user_id)
            .ok_or(ServiceError::NotFound("Stream"))
    }

    pub async fn streams_of(&self, user_id: &str) -> Vec<Stream> {
        let state = self.state.lock().await;
        let mut streams = state
            .streams
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        streams.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        streams
    }

    /// Removes a stream together with all of its destinations.
    pub async fn remove_stream(&self, stream_id: Uuid) -> Option<(Stream, Vec<StreamDestination>)> {
        let mut state = self.state.lock().await;
        let stream = state.streams.remove(&stream_id)?;

        let ids = state
            .destinations
            .values()
            .filter(|d| d.stream_id == stream_id)
            .map(|d| d.id)
            .collect::<Vec<_>>();
        let destinations = ids
            .iter()
            .filter_map(|id| state.destinations.remove(id))
            .collect();

        self.save(&state).await;
        Some((stream, destinations))
    }

    pub async fn insert_destination(&self, destination: StreamDestination) {
        let mut state = self.state.lock().await;
        state.destinations.insert(destination.id, destination);
        self.save(&state).await;
    }

    pub async fn destination(
        &self,
        stream_id: Uuid,
        destination_id: Uuid,
    ) -> Result<StreamDestination> {
        self.state
            .lock()
            .await
            .destinations
            .get(&destination_id)
            .filter(|d| d.stream_id == stream_id)
            .cloned()
            .ok_or(ServiceError::NotFound("Destination"))
    }

    /// Destinations of a stream, newest first.
    pub async fn destinations(&self, stream_id: Uuid) -> Vec<StreamDestination> {
        let state = self.state.lock().await;
        let mut destinations = state
            .destinations
            .values()
            .filter(|d| d.stream_id == stream_id)
            .cloned()
            .collect::<Vec<_>>();
        destinations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        destinations
    }

    /// Applies `update` to a destination and persists the result.
    pub async fn update_destination<F>(&self, destination_id: Uuid, update: F) -> Option<StreamDestination>
    where
        F: FnOnce(&mut StreamDestination),
    {
        let mut state = self.state.lock().await;
        let destination = state.destinations.get_mut(&destination_id)?;
        update(destination);
        let updated = destination.clone();
        self.save(&state).await;
        Some(updated)
    }

    pub async fn remove_destination(&self, destination_id: Uuid) -> Option<StreamDestination> {
        let mut state = self.state.lock().await;
        let removed = state.destinations.remove(&destination_id)?;
        self.save(&state).await;
        Some(removed)
    }
}
