use crate::model::{ChatPlatform, CommentStatus, IngestedComment};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// A comment observed on a platform, not yet stored.
#[derive(Clone, Debug)]
pub struct NewComment {
    pub stream_id: Uuid,
    pub source: ChatPlatform,
    pub external_id: String,
    pub author_name: String,
    pub author_image: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: JsonMap<String, JsonValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Upsert {
    Created(IngestedComment),
    /// Already stored under the same (platform, external id). Left unchanged.
    Existing(IngestedComment),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CommentQuery {
    pub status: Option<CommentStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default)]
struct CommentState {
    comments: HashMap<Uuid, IngestedComment>,
    by_natural_key: HashMap<(ChatPlatform, String), Uuid>,
}

impl CommentState {
    fn of_stream(&self, stream_id: Uuid) -> impl Iterator<Item = &IngestedComment> {
        self.comments
            .values()
            .filter(move |c| c.stream_id == stream_id)
    }

    fn scoped_mut(&mut self, stream_id: Uuid, comment_id: Uuid) -> Option<&mut IngestedComment> {
        self.comments
            .get_mut(&comment_id)
            .filter(|c| c.stream_id == stream_id)
    }
}

/// Ingested comments, unique by (platform, external id).
#[derive(Clone, Debug, Default)]
pub struct CommentStore {
    state: Arc<RwLock<CommentState>>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `comment` unless its natural key is already present.
    pub fn upsert(&self, comment: NewComment) -> Upsert {
        let mut state = self.state.write();
        let key = (comment.source, comment.external_id);
        if let Some(existing) = state
            .by_natural_key
            .get(&key)
            .and_then(|id| state.comments.get(id))
        {
            return Upsert::Existing(existing.clone());
        }

        let stored = IngestedComment {
            id: Uuid::new_v4(),
            stream_id: comment.stream_id,
            source: comment.source,
            external_id: key.1.clone(),
            author_name: comment.author_name,
            author_image: comment.author_image,
            text: comment.text,
            status: CommentStatus::Pending,
            timestamp: comment.timestamp,
            metadata: comment.metadata,
            created_at: Utc::now(),
        };
        state.by_natural_key.insert(key, stored.id);
        state.comments.insert(stored.id, stored.clone());
        Upsert::Created(stored)
    }

    pub fn get(&self, stream_id: Uuid, comment_id: Uuid) -> Option<IngestedComment> {
        self.state
            .read()
            .comments
            .get(&comment_id)
            .filter(|c| c.stream_id == stream_id)
            .cloned()
    }

    /// Comments of a stream, newest platform timestamp first.
    pub fn list(&self, stream_id: Uuid, query: &CommentQuery) -> Vec<IngestedComment> {
        let state = self.state.read();
        let mut comments = state
            .of_stream(stream_id)
            .filter(|c| query.status.is_none_or(|status| c.status == status))
            .cloned()
            .collect::<Vec<_>>();
        comments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        comments
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(limit)
            .collect()
    }

    /// Comments of a stream posted after `since`, oldest first.
    pub fn recent_since(&self, stream_id: Uuid, since: DateTime<Utc>) -> Vec<IngestedComment> {
        let state = self.state.read();
        let mut comments = state
            .of_stream(stream_id)
            .filter(|c| c.timestamp > since)
            .cloned()
            .collect::<Vec<_>>();
        comments.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        comments
    }

    pub fn update_status(
        &self,
        stream_id: Uuid,
        comment_id: Uuid,
        status: CommentStatus,
    ) -> Option<IngestedComment> {
        let mut state = self.state.write();
        let comment = state.scoped_mut(stream_id, comment_id)?;
        comment.status = status;
        Some(comment.clone())
    }

    /// Updates every listed comment that belongs to the stream; others are
    /// skipped.
    pub fn bulk_update_status(
        &self,
        stream_id: Uuid,
        comment_ids: &[Uuid],
        status: CommentStatus,
    ) -> Vec<IngestedComment> {
        let mut state = self.state.write();
        comment_ids
            .iter()
            .filter_map(|id| {
                let comment = state.scoped_mut(stream_id, *id)?;
                comment.status = status;
                Some(comment.clone())
            })
            .collect()
    }

    pub fn delete(&self, stream_id: Uuid, comment_id: Uuid) -> Option<IngestedComment> {
        let mut state = self.state.write();
        state.scoped_mut(stream_id, comment_id)?;
        let removed = state.comments.remove(&comment_id)?;
        state
            .by_natural_key
            .remove(&(removed.source, removed.external_id.clone()));
        Some(removed)
    }

    /// Drops all comments of a stream. Returns how many were removed.
    pub fn remove_stream(&self, stream_id: Uuid) -> usize {
        let mut state = self.state.write();
        let before = state.comments.len();
        state.comments.retain(|_, c| c.stream_id != stream_id);
        let CommentState {
            comments,
            by_natural_key,
        } = &mut *state;
        by_natural_key.retain(|_, id| comments.contains_key(id));
        before - comments.len()
    }

    pub fn count(&self, stream_id: Uuid) -> usize {
        self.state.read().of_stream(stream_id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn comment(stream_id: Uuid, external_id: &str, minutes: i64) -> NewComment {
        NewComment {
            stream_id,
            source: ChatPlatform::Youtube,
            external_id: external_id.into(),
            author_name: "viewer".into(),
            author_image: None,
            text: format!("message {external_id}"),
            timestamp: DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes),
            metadata: JsonMap::new(),
        }
    }

    #[test]
    fn upsert_is_idempotent_by_natural_key() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();

        let Upsert::Created(first) = store.upsert(comment(stream_id, "yt-1", 0)) else {
            panic!("first observation must create");
        };
        let mut again = comment(stream_id, "yt-1", 5);
        again.text = "edited upstream".into();
        let Upsert::Existing(existing) = store.upsert(again) else {
            panic!("second observation must not create");
        };

        assert_eq!(existing, first);
        assert_eq!(store.count(stream_id), 1);
    }

    #[test]
    fn same_external_id_on_another_platform_is_distinct() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();
        store.upsert(comment(stream_id, "1", 0));
        let mut twitch = comment(stream_id, "1", 0);
        twitch.source = ChatPlatform::Twitch;

        assert!(matches!(store.upsert(twitch), Upsert::Created(_)));
        assert_eq!(store.count(stream_id), 2);
    }

    #[test]
    fn list_filters_and_pages_newest_first() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();
        let ids = (0..5)
            .map(|i| match store.upsert(comment(stream_id, &format!("c{i}"), i)) {
                Upsert::Created(c) | Upsert::Existing(c) => c.id,
            })
            .collect::<Vec<_>>();
        store.upsert(comment(Uuid::new_v4(), "other", 10));
        store.update_status(stream_id, ids[1], CommentStatus::Approved);
        store.update_status(stream_id, ids[3], CommentStatus::Approved);

        let page = store.list(
            stream_id,
            &CommentQuery {
                status: None,
                limit: Some(2),
                offset: Some(1),
            },
        );
        let external = page.iter().map(|c| c.external_id.as_str()).collect::<Vec<_>>();
        assert_eq!(external, vec!["c3", "c2"]);

        let approved = store.list(
            stream_id,
            &CommentQuery {
                status: Some(CommentStatus::Approved),
                ..Default::default()
            },
        );
        assert_eq!(approved.len(), 2);
        assert_eq!(approved[0].external_id, "c3");
    }

    #[test]
    fn recent_since_is_oldest_first() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();
        for i in [3, 1, 2, 0] {
            store.upsert(comment(stream_id, &format!("c{i}"), i));
        }

        let since = DateTime::<Utc>::UNIX_EPOCH;
        let recent = store.recent_since(stream_id, since);
        let external = recent.iter().map(|c| c.external_id.as_str()).collect::<Vec<_>>();
        assert_eq!(external, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn moderation_is_scoped_to_the_stream() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();
        let Upsert::Created(stored) = store.upsert(comment(stream_id, "c", 0)) else {
            unreachable!()
        };

        assert!(store.update_status(Uuid::new_v4(), stored.id, CommentStatus::Flagged).is_none());
        assert!(store.delete(Uuid::new_v4(), stored.id).is_none());

        let updated = store.bulk_update_status(
            stream_id,
            &[stored.id, Uuid::new_v4()],
            CommentStatus::Rejected,
        );
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].status, CommentStatus::Rejected);

        assert!(store.delete(stream_id, stored.id).is_some());
        // a deleted comment may be ingested again
        assert!(matches!(store.upsert(comment(stream_id, "c", 0)), Upsert::Created(_)));
    }

    #[test]
    fn removing_a_stream_drops_its_comments() {
        let store = CommentStore::new();
        let stream_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.upsert(comment(stream_id, "a", 0));
        store.upsert(comment(stream_id, "b", 0));
        store.upsert(comment(other, "c", 0));

        assert_eq!(store.remove_stream(stream_id), 2);
        assert_eq!(store.count(stream_id), 0);
        assert_eq!(store.count(other), 1);
        assert!(matches!(store.upsert(comment(stream_id, "a", 0)), Upsert::Created(_)));
    }
}
