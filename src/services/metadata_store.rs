//! src/services/metadata_store.rs
//!
//! MetadataStore: image records in SQLite plus live "recent images" queries.
//! Every successful write pings a broadcast channel; subscribers re-run their
//! query and push the full ordered snapshot.

use crate::models::image::{ImageRecord, NewImageRecord};
use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

const MIGRATIONS: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata store closed")]
    Closed,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Live stream of "current recent list" snapshots. Dropping it unsubscribes.
pub type SnapshotStream = BoxStream<'static, MetadataResult<Vec<ImageRecord>>>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Write a record keyed by its id, stamping `created_at`. Overwrites an
    /// existing record with the same id.
    async fn put_image(&self, record: NewImageRecord) -> MetadataResult<ImageRecord>;

    async fn get_image(&self, id: &str) -> MetadataResult<Option<ImageRecord>>;

    /// Newest first, at most `limit` records.
    async fn recent_images(&self, limit: u32) -> MetadataResult<Vec<ImageRecord>>;

    /// Current snapshot now, then a fresh one after every write.
    fn subscribe_recent(&self, limit: u32) -> SnapshotStream;

    async fn health_check(&self) -> MetadataResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    changes: broadcast::Sender<()>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self { db, changes }
    }

    /// Open a store on a single in-memory connection with the schema applied.
    #[cfg(test)]
    pub async fn new_in_memory() -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(Arc::new(pool));
        store.migrate().await?;
        Ok(store)
    }

    /// Connect a pool for `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = MIGRATIONS
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    async fn query_recent(db: &SqlitePool, limit: u32) -> MetadataResult<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRecord>(
            "SELECT id, filename, content_type, size, storage_path, download_url, created_at
             FROM images
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put_image(&self, record: NewImageRecord) -> MetadataResult<ImageRecord> {
        let record = record.into_record(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO images (
                id, filename, content_type, size, storage_path, download_url, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size = excluded.size,
                storage_path = excluded.storage_path,
                download_url = excluded.download_url,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.size)
        .bind(&record.storage_path)
        .bind(&record.download_url)
        .bind(record.created_at)
        .execute(&*self.db)
        .await?;

        // No receivers just means nobody is watching the feed.
        let _ = self.changes.send(());
        Ok(record)
    }

    async fn get_image(&self, id: &str) -> MetadataResult<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRecord>(
            "SELECT id, filename, content_type, size, storage_path, download_url, created_at
             FROM images WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn recent_images(&self, limit: u32) -> MetadataResult<Vec<ImageRecord>> {
        Self::query_recent(&self.db, limit).await
    }

    fn subscribe_recent(&self, limit: u32) -> SnapshotStream {
        let db = self.db.clone();
        // The stream owns a sender so the channel outlives every store handle.
        let changes = self.changes.clone();
        let rx = self.changes.subscribe();

        // State: (pool, sender, receiver, first snapshot still owed, failed).
        futures::stream::unfold(
            (db, changes, rx, true, false),
            move |(db, changes, mut rx, first, failed)| async move {
                if failed {
                    return None;
                }
                if !first {
                    match rx.recv().await {
                        Ok(()) => {}
                        // Missed pings collapse into one re-query.
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("recent feed lagged by {} writes", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Some((
                                Err(MetadataError::Closed),
                                (db, changes, rx, false, true),
                            ));
                        }
                    }
                }
                let snapshot = Self::query_recent(&db, limit).await;
                let failed = snapshot.is_err();
                Some((snapshot, (db, changes, rx, false, failed)))
            },
        )
        .boxed()
    }

    async fn health_check(&self) -> MetadataResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(MetadataError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {}",
                one
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_record(id: &str) -> NewImageRecord {
        NewImageRecord {
            id: id.to_string(),
            filename: format!("{id}.png"),
            content_type: "image/png".into(),
            size: 42,
            storage_path: format!("{id}.png"),
            download_url: format!("http://localhost:3000/objects/{id}.png"),
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        let written = store.put_image(new_record("aaaaaaa")).await.unwrap();

        let read = store.get_image("aaaaaaa").await.unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.size, 42);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        assert!(store.get_image("nothere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_capped() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        for i in 0..5 {
            store.put_image(new_record(&format!("img{i:04}"))).await.unwrap();
        }

        let recent = store.recent_images(3).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["img0004", "img0003", "img0002"]);
    }

    #[tokio::test]
    async fn test_same_id_overwrites() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        store.put_image(new_record("dupdup1")).await.unwrap();
        let mut second = new_record("dupdup1");
        second.filename = "second.png".into();
        store.put_image(second).await.unwrap();

        let recent = store.recent_images(15).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].filename, "second.png");
    }

    #[tokio::test]
    async fn test_subscription_pushes_snapshot_after_each_write() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        let mut sub = store.subscribe_recent(15);

        let initial = sub.next().await.unwrap().unwrap();
        assert!(initial.is_empty());

        store.put_image(new_record("first01")).await.unwrap();
        let after_one = sub.next().await.unwrap().unwrap();
        assert_eq!(after_one.len(), 1);

        store.put_image(new_record("second2")).await.unwrap();
        let after_two = sub.next().await.unwrap().unwrap();
        assert_eq!(after_two[0].id, "second2");
        assert_eq!(after_two[1].id, "first01");
    }

    #[tokio::test]
    async fn test_subscription_outlives_the_store_handle() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        let mut sub = store.subscribe_recent(15);
        drop(store);

        assert!(sub.next().await.unwrap().unwrap().is_empty());
        // Nothing writes any more, so the stream stays pending rather than failing.
        let next = tokio::time::timeout(std::time::Duration::from_millis(100), sub.next()).await;
        assert!(next.is_err(), "subscription ended early: {next:?}");
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqliteMetadataStore::new_in_memory().await.unwrap();
        store.health_check().await.unwrap();
    }
}
