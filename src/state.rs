//! Shared state handed to every handler.

use crate::services::{
    metadata_store::MetadataStore, object_store::ObjectStore, upload_service::UploadService,
};
use std::sync::Arc;

/// Constructed once in `main` and cloned per request; all clones share the
/// same backends.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            uploads: UploadService::new(objects.clone(), metadata.clone()),
            metadata,
            objects,
            max_upload_bytes,
        }
    }
}
