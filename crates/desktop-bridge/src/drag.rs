//! Drag export of cached assets into other applications
//!
//! A native drag has to start synchronously inside the OS gesture, so only
//! files already on disk can take part. Anything not cached yet is left out
//! of the drag and fetched in the background for the next attempt.

use crate::error::{BridgeError, Result};
use media_cache::{AssetDescriptor, MediaCache};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// The platform side of a drag
pub trait DragHost: Send + Sync {
    fn start_drag(&self, files: &[PathBuf], icon: Option<&Path>) -> Result<()>;
}

/// A drag handed to a [`LoggingDragHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragRequest {
    pub files: Vec<PathBuf>,
    pub icon: Option<PathBuf>,
}

/// Host used when no platform integration is attached; it only records
/// what would have been dragged.
#[derive(Default)]
pub struct LoggingDragHost {
    requests: Mutex<Vec<DragRequest>>,
}

impl LoggingDragHost {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn requests(&self) -> Vec<DragRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl DragHost for LoggingDragHost {
    fn start_drag(&self, files: &[PathBuf], icon: Option<&Path>) -> Result<()> {
        let request = DragRequest {
            files: files.to_vec(),
            icon: icon.map(Path::to_path_buf),
        };
        info!(count = request.files.len(), icon = ?request.icon, "Native drag requested");
        self.requests
            .lock()
            .map_err(|_| BridgeError::Drag("drag log poisoned".to_string()))?
            .push(request);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DragOutcome {
    /// A native drag began with `files`; `deferred` ids were not cached yet
    Started {
        files: Vec<PathBuf>,
        deferred: Vec<String>,
    },
    /// Nothing was cached, so no drag was started
    Deferred { pending: Vec<String> },
}

/// Decides what a drag gesture exports
pub struct DragCoordinator {
    cache: Arc<MediaCache>,
    host: Arc<dyn DragHost>,
}

impl DragCoordinator {
    pub fn new(cache: Arc<MediaCache>, host: Arc<dyn DragHost>) -> Self {
        Self { cache, host }
    }

    /// Start a drag for `dragged_id`. When the item is part of `selection`
    /// the whole selection goes along, in selection order.
    pub async fn begin_drag(
        &self,
        dragged_id: &str,
        selection: &[String],
        descriptors: &[AssetDescriptor],
    ) -> Result<DragOutcome> {
        let ids: Vec<String> = if selection.iter().any(|id| id == dragged_id) {
            selection.to_vec()
        } else {
            vec![dragged_id.to_string()]
        };

        let mut files = Vec::new();
        let mut icon = None;
        let mut pending = Vec::new();
        for id in ids {
            match self.cache.lookup(&id).await.file_path {
                Some(path) => {
                    files.push(path);
                    if icon.is_none() {
                        icon = self.cache.lookup_thumbnail(&id).await.file_path;
                    }
                }
                None => pending.push(id),
            }
        }

        if !pending.is_empty() {
            let fetch: Vec<AssetDescriptor> = descriptors
                .iter()
                .filter(|d| pending.contains(&d.id))
                .cloned()
                .collect();
            if !fetch.is_empty() {
                debug!(count = fetch.len(), "Fetching drag items in background");
                // Runs detached; dropping the handle does not cancel it
                drop(self.cache.preload(fetch));
            }
        }

        if files.is_empty() {
            info!(dragged_id, pending = pending.len(), "Drag deferred, nothing cached");
            return Ok(DragOutcome::Deferred { pending });
        }

        self.host.start_drag(&files, icon.as_deref())?;
        if !pending.is_empty() {
            warn!(
                dragged = files.len(),
                left_out = pending.len(),
                "Drag started without uncached items"
            );
        }
        Ok(DragOutcome::Started {
            files,
            deferred: pending,
        })
    }
}

/// A drag source must be an existing, non-empty regular file
pub async fn check_drag_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(BridgeError::Drag(format!(
            "not a non-empty file: {}",
            path.display()
        ))),
        Err(_) => Err(BridgeError::Drag(format!(
            "file not found: {}",
            path.display()
        ))),
    }
}
