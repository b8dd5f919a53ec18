//! src/services/object_store.rs
//!
//! ObjectStore: where image bytes live. The disk implementation keeps payloads
//! sharded beneath `base_path/{shard}/{shard}/{path}` and writes them through a
//! temp file so a failed transfer never leaves a partial object behind.

use crate::models::upload::{ByteStream, UploadProgress};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid storage path")]
    InvalidPath,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// An opened object ready to be streamed out.
pub struct ObjectReader {
    pub len: u64,
    pub body: ByteStream<'static>,
}

/// Byte storage used by the upload workflow and the object route.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `body` to `path`, reporting progress after every chunk.
    ///
    /// A final event with `total_bytes == Some(written)` is always emitted on
    /// success. Returns the number of bytes written.
    async fn put(
        &self,
        path: &str,
        content_type: &str,
        size_hint: Option<u64>,
        body: ByteStream<'_>,
        progress: &mut (dyn FnMut(UploadProgress) + Send),
    ) -> ObjectStoreResult<u64>;

    /// Durable URL the object can be fetched from.
    async fn retrieval_url(&self, path: &str) -> ObjectStoreResult<String>;

    async fn open(&self, path: &str) -> ObjectStoreResult<ObjectReader>;

    async fn delete(&self, path: &str) -> ObjectStoreResult<()>;

    /// Readiness probe.
    async fn health_check(&self) -> ObjectStoreResult<()>;
}

const MAX_PATH_LEN: usize = 1024;

/// Local disk object store.
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix of retrieval URLs, without a trailing slash.
    pub public_base_url: String,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Rejects paths that could escape `base_path`.
    fn ensure_path_safe(&self, path: &str) -> ObjectStoreResult<()> {
        if path.is_empty() || path.len() > MAX_PATH_LEN {
            return Err(ObjectStoreError::InvalidPath);
        }
        if path.starts_with('/') || path.contains("..") {
            return Err(ObjectStoreError::InvalidPath);
        }
        if path
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidPath);
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(path), first two bytes as hex.
    fn object_shards(path: &str) -> (String, String) {
        let digest = md5::compute(path);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, path: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(path);
        let mut full = self.base_path.clone();
        full.push(shard_a);
        full.push(shard_b);
        full.push(path);
        full
    }

    /// Remove empty shard directories up to (not including) `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn put(
        &self,
        path: &str,
        content_type: &str,
        size_hint: Option<u64>,
        mut body: ByteStream<'_>,
        progress: &mut (dyn FnMut(UploadProgress) + Send),
    ) -> ObjectStoreResult<u64> {
        self.ensure_path_safe(path)?;

        let file_path = self.object_path(path);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        debug!("writing {} ({}) via {}", path, content_type, tmp_path.display());

        let mut written: u64 = 0;
        progress(UploadProgress {
            bytes_transferred: 0,
            total_bytes: size_hint,
        });
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ObjectStoreError::Io(err));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
            written += chunk.len() as u64;
            progress(UploadProgress {
                bytes_transferred: written,
                total_bytes: size_hint.map(|total| total.max(written)),
            });
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }

        progress(UploadProgress {
            bytes_transferred: written,
            total_bytes: Some(written),
        });
        Ok(written)
    }

    async fn retrieval_url(&self, path: &str) -> ObjectStoreResult<String> {
        self.ensure_path_safe(path)?;
        let file_path = self.object_path(path);
        if !fs::try_exists(&file_path).await? {
            return Err(ObjectStoreError::NotFound(path.to_string()));
        }
        Ok(format!("{}/objects/{}", self.public_base_url, path))
    }

    async fn open(&self, path: &str) -> ObjectStoreResult<ObjectReader> {
        self.ensure_path_safe(path)?;
        let file_path = self.object_path(path);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(path.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok(ObjectReader {
            len,
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn delete(&self, path: &str) -> ObjectStoreResult<()> {
        self.ensure_path_safe(path)?;
        let file_path = self.object_path(path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Write, read back and delete a temp file under `base_path`.
    async fn health_check(&self) -> ObjectStoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(ObjectStoreError::Io(io::Error::other("file content mismatch")));
        }
        Ok(())
    }
}
