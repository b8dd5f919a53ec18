//! One-shot lookup of a single image by its identifier.

use crate::{models::image::ImageRecord, services::metadata_store::MetadataStore};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum DetailState {
    Loading,
    Found(ImageRecord),
    /// No record with that id. Not an error.
    NotFound,
    /// The lookup itself failed.
    Failed(String),
}

/// An in-flight or finished lookup. Dropping it cancels the lookup, and no
/// state is published after that.
pub struct DetailView {
    state: watch::Receiver<DetailState>,
    task: JoinHandle<()>,
}

impl DetailView {
    pub fn open(store: Arc<dyn MetadataStore>, id: impl Into<String>) -> Self {
        let id = id.into();
        let (tx, rx) = watch::channel(DetailState::Loading);

        let task = tokio::spawn(async move {
            let next = match store.get_image(&id).await {
                Ok(Some(record)) => DetailState::Found(record),
                Ok(None) => {
                    debug!("image {} not found", id);
                    DetailState::NotFound
                }
                Err(err) => {
                    warn!("looking up image {} failed: {}", id, err);
                    DetailState::Failed(err.to_string())
                }
            };
            let _ = tx.send(next);
        });

        Self { state: rx, task }
    }

    pub fn state(&self) -> DetailState {
        self.state.borrow().clone()
    }

    /// Wait for the lookup to finish.
    pub async fn resolved(&mut self) -> DetailState {
        if let Ok(state) = self
            .state
            .wait_for(|state| !matches!(state, DetailState::Loading))
            .await
        {
            return state.clone();
        }
        self.state()
    }
}

impl Drop for DetailView {
    fn drop(&mut self) {
        self.task.abort();
    }
}
