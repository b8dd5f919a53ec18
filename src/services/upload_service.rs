//! src/services/upload_service.rs
//!
//! UploadService: turns one selected file into a stored object plus an image
//! record. Steps run strictly in order; the record is only written once the
//! bytes are safely stored, so a failed upload never leaves metadata behind.

use crate::{
    models::{
        image::{NewImageRecord, view_url},
        upload::{IncomingFile, UploadProgress, UploadResult},
    },
    services::{
        id_generator::{IdSource, default_id_source},
        metadata_store::{MetadataError, MetadataStore},
        object_store::{ObjectStore, ObjectStoreError},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Transfer(#[source] ObjectStoreError),
    #[error("could not resolve download URL: {0}")]
    RetrievalUrl(#[source] ObjectStoreError),
    #[error("could not save image details: {0}")]
    Metadata(#[from] MetadataError),
}

/// Extensions for files whose name carries none.
const MIME_EXTENSIONS: [(&str, &str); 10] = [
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
];

/// Derive the storage extension for a file.
///
/// The filename suffix wins over the MIME type, even when the two disagree.
/// The result only ever contains `[a-z0-9]`; `None` means no extension.
pub fn derive_extension(filename: &str, content_type: &str) -> Option<String> {
    let from_name = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty());

    let raw = from_name.or_else(|| {
        MIME_EXTENSIONS
            .iter()
            .find(|(mime, _)| *mime == content_type)
            .map(|(_, ext)| ext.to_string())
    })?;

    let sanitized: String = raw
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    (!sanitized.is_empty()).then_some(sanitized)
}

/// `{id}` or `{id}.{ext}`.
pub fn storage_path(id: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Orchestrates id generation, byte upload and the metadata write.
#[derive(Clone)]
pub struct UploadService {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    ids: IdSource,
}

impl UploadService {
    pub fn new(objects: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            objects,
            metadata,
            ids: default_id_source(),
        }
    }

    /// Replace the identifier source.
    pub fn with_id_source(mut self, ids: IdSource) -> Self {
        self.ids = ids;
        self
    }

    /// Upload one file.
    ///
    /// `None` is a silent no-op. `on_progress` receives the rounded percentage
    /// on every progress event whose total is known. Nothing is retried; a new
    /// attempt starts over with a fresh identifier.
    pub async fn upload<F>(
        &self,
        file: Option<IncomingFile<'_>>,
        mut on_progress: F,
    ) -> Result<Option<UploadResult>, UploadError>
    where
        F: FnMut(u8) + Send,
    {
        let Some(file) = file else {
            debug!("no file selected, nothing to upload");
            return Ok(None);
        };

        let id = (self.ids)();
        let ext = derive_extension(&file.filename, &file.content_type);
        let path = storage_path(&id, ext.as_deref());
        info!(
            "uploading {} ({}, {:?} bytes) as {}",
            file.filename, file.content_type, file.size_hint, path
        );

        let size = self
            .objects
            .put(
                &path,
                &file.content_type,
                file.size_hint,
                file.body,
                &mut |progress: UploadProgress| {
                    if let Some(percent) = progress.percent() {
                        on_progress(percent);
                    }
                },
            )
            .await
            .map_err(|err| {
                warn!("byte upload of {} failed: {}", path, err);
                UploadError::Transfer(err)
            })?;
        debug!("stored {} bytes at {}", size, path);

        let download_url = match self.objects.retrieval_url(&path).await {
            Ok(url) => url,
            Err(err) => {
                warn!("resolving download URL for {} failed: {}", path, err);
                self.discard_object(&id, &path).await;
                return Err(UploadError::RetrievalUrl(err));
            }
        };

        let record = NewImageRecord {
            id: id.clone(),
            filename: file.filename,
            content_type: file.content_type,
            size: size as i64,
            storage_path: path.clone(),
            download_url: download_url.clone(),
        };
        if let Err(err) = self.metadata.put_image(record).await {
            warn!("writing image record {} failed: {}", id, err);
            self.discard_object(&id, &path).await;
            return Err(err.into());
        }

        info!("upload of {} complete", id);
        Ok(Some(UploadResult {
            view_url: view_url(&id),
            id,
            download_url,
        }))
    }

    /// Best-effort removal of bytes that will never get a record.
    ///
    /// An earlier record under the same id that points at `path` still owns
    /// the object, so it is left in place.
    async fn discard_object(&self, id: &str, path: &str) {
        match self.metadata.get_image(id).await {
            Ok(Some(existing)) if existing.storage_path == path => {
                warn!("keeping {}: still referenced by an earlier record", path);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("keeping {}: could not check for an earlier record: {}", path, err);
                return;
            }
        }
        if let Err(err) = self.objects.delete(path).await {
            debug!("could not remove orphaned object {}: {}", path, err);
        }
    }
}
