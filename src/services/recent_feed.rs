//! Live list of the most recent uploads.

use crate::{
    models::image::ImageRecord,
    services::metadata_store::MetadataStore,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

/// How many uploads the landing page shows.
pub const RECENT_LIMIT: u32 = 15;

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum FeedState {
    /// No snapshot received yet.
    Loading,
    /// Latest snapshot, newest first. May be empty.
    Loaded { items: Vec<ImageRecord> },
    /// The subscription failed; `last_known` is whatever was shown before.
    #[serde(rename_all = "camelCase")]
    Failed {
        message: String,
        last_known: Vec<ImageRecord>,
    },
}

/// A standing subscription to the newest records.
///
/// Dropping the feed stops the subscription; no state is published afterwards.
pub struct RecentFeed {
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

impl RecentFeed {
    pub fn open(store: Arc<dyn MetadataStore>, limit: u32) -> Self {
        let (tx, rx) = watch::channel(FeedState::Loading);
        let mut snapshots = store.subscribe_recent(limit);

        let task = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                match snapshot {
                    Ok(items) => {
                        debug!("recent feed snapshot with {} items", items.len());
                        if tx.send(FeedState::Loaded { items }).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("recent feed subscription failed: {}", err);
                        let last_known = match &*tx.borrow() {
                            FeedState::Loaded { items } => items.clone(),
                            _ => Vec::new(),
                        };
                        let _ = tx.send(FeedState::Failed {
                            message: err.to_string(),
                            last_known,
                        });
                        return;
                    }
                }
            }
        });

        Self { state: rx, task }
    }

    /// Current state without waiting.
    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Wait for the next state change. `None` once the subscription has ended.
    pub async fn changed(&mut self) -> Option<FeedState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Wait until the feed has left `Loading`.
    pub async fn settled(&mut self) -> FeedState {
        if let Ok(state) = self
            .state
            .wait_for(|state| !matches!(state, FeedState::Loading))
            .await
        {
            return state.clone();
        }
        self.state()
    }
}

impl Drop for RecentFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::image::NewImageRecord,
        services::{
            metadata_store::{
                MetadataError, MetadataResult, SnapshotStream, SqliteMetadataStore,
                tests::new_record,
            },
            upload_service::tests::{incoming, service},
        },
    };
    use async_trait::async_trait;
    use futures::stream;

    /// Store whose subscription delivers one snapshot and then errors.
    struct FlakyFeedStore(SqliteMetadataStore);

    #[async_trait]
    impl MetadataStore for FlakyFeedStore {
        async fn put_image(&self, record: NewImageRecord) -> MetadataResult<ImageRecord> {
            self.0.put_image(record).await
        }

        async fn get_image(&self, id: &str) -> MetadataResult<Option<ImageRecord>> {
            self.0.get_image(id).await
        }

        async fn recent_images(&self, limit: u32) -> MetadataResult<Vec<ImageRecord>> {
            self.0.recent_images(limit).await
        }

        fn subscribe_recent(&self, limit: u32) -> SnapshotStream {
            let first = self.0.subscribe_recent(limit).take(1);
            first
                .chain(stream::once(async { Err(MetadataError::Closed) }))
                .boxed()
        }

        async fn health_check(&self) -> MetadataResult<()> {
            Ok(())
        }
    }

    fn ids(state: &FeedState) -> Vec<String> {
        match state {
            FeedState::Loaded { items } => items.iter().map(|r| r.id.clone()).collect(),
            other => panic!("expected loaded feed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_store_settles_to_empty_list() {
        let store = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
        let mut feed = RecentFeed::open(store, RECENT_LIMIT);

        assert_eq!(feed.settled().await, FeedState::Loaded { items: vec![] });
    }

    #[tokio::test]
    async fn test_feed_stays_loaded_after_store_handle_is_dropped() {
        let store = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
        let mut feed = RecentFeed::open(store, RECENT_LIMIT);
        assert_eq!(feed.settled().await, FeedState::Loaded { items: vec![] });

        let next = tokio::time::timeout(std::time::Duration::from_millis(100), feed.changed()).await;
        assert!(next.is_err(), "feed changed unexpectedly: {next:?}");
        assert_eq!(feed.state(), FeedState::Loaded { items: vec![] });
    }

    #[tokio::test]
    async fn test_feed_follows_uploads_and_keeps_newest_fifteen() {
        let (uploads, metadata) = service().await;
        let mut feed = RecentFeed::open(metadata.clone(), RECENT_LIMIT);
        assert!(ids(&feed.settled().await).is_empty());

        let first = uploads
            .upload(Some(incoming("one.png", "image/png", b"1")), |_| {})
            .await
            .unwrap()
            .unwrap();
        let after_one = feed.changed().await.unwrap();
        assert_eq!(ids(&after_one), vec![first.id.clone()]);

        let mut uploaded = vec![first.id];
        for i in 1..16 {
            let name = format!("img{i}.png");
            let result = uploads
                .upload(Some(incoming(&name, "image/png", b"x")), |_| {})
                .await
                .unwrap()
                .unwrap();
            uploaded.push(result.id);
        }

        // Pushes may be coalesced; wait for the snapshot that includes the last upload.
        let newest = uploaded.last().unwrap().clone();
        let mut state = feed.state();
        while ids(&state).first() != Some(&newest) {
            state = feed.changed().await.unwrap();
        }

        let expected: Vec<String> = uploaded.iter().rev().take(15).cloned().collect();
        assert_eq!(ids(&state), expected);
    }

    #[tokio::test]
    async fn test_subscription_error_keeps_last_known_items() {
        let inner = SqliteMetadataStore::new_in_memory().await.unwrap();
        inner.put_image(new_record("kept001")).await.unwrap();
        let store = Arc::new(FlakyFeedStore(inner));

        let mut feed = RecentFeed::open(store, RECENT_LIMIT);
        let mut state = feed.settled().await;
        while !matches!(state, FeedState::Failed { .. }) {
            state = feed.changed().await.unwrap_or_else(|| feed.state());
        }

        match state {
            FeedState::Failed {
                message,
                last_known,
            } => {
                assert_eq!(message, "metadata store closed");
                assert_eq!(last_known.len(), 1);
                assert_eq!(last_known[0].id, "kept001");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_feed_stops_its_task() {
        let store = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
        let feed = RecentFeed::open(store.clone(), RECENT_LIMIT);
        let mut rx = feed.state.clone();
        drop(feed);

        store.put_image(new_record("after01")).await.unwrap();

        // The aborted task drops its sender; whatever it managed to publish
        // before teardown never includes the later write.
        while rx.changed().await.is_ok() {
            if let FeedState::Loaded { items } = &*rx.borrow_and_update() {
                assert!(items.iter().all(|r| r.id != "after01"));
            }
        }
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let value = serde_json::to_value(FeedState::Failed {
            message: "boom".into(),
            last_known: vec![],
        })
        .unwrap();
        assert_eq!(value["state"], "failed");
        assert_eq!(value["lastKnown"], serde_json::json!([]));
        assert_eq!(
            serde_json::to_value(FeedState::Loading).unwrap()["state"],
            "loading"
        );
    }
}
