//! The six cache operations the shell calls
//!
//! Expected failures (network, disk, missing files) come back as data in
//! the response, never as errors.

use async_trait::async_trait;
use media_cache::{AssetDescriptor, CacheLookup, CacheSize, MediaCache, PrepareReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::drag::{check_drag_file, DragHost};
use crate::types::{ClearCacheResponse, DragResponse};

#[async_trait]
pub trait CacheBridge: Send + Sync {
    async fn prepare_cache(&self, items: Vec<AssetDescriptor>) -> PrepareReport;
    async fn get_cached_path(&self, id: &str) -> CacheLookup;
    async fn get_cached_thumbnail_path(&self, id: &str) -> CacheLookup;
    async fn get_cache_size(&self) -> CacheSize;
    async fn clear_cache(&self) -> ClearCacheResponse;
    async fn start_native_drag(
        &self,
        file_paths: Vec<PathBuf>,
        thumbnail_paths: Vec<PathBuf>,
    ) -> DragResponse;
}

/// Bridge over the in-process cache and drag host
pub struct LocalBridge {
    cache: Arc<MediaCache>,
    drag: Arc<dyn DragHost>,
}

impl LocalBridge {
    pub fn new(cache: Arc<MediaCache>, drag: Arc<dyn DragHost>) -> Self {
        Self { cache, drag }
    }
}

#[async_trait]
impl CacheBridge for LocalBridge {
    async fn prepare_cache(&self, items: Vec<AssetDescriptor>) -> PrepareReport {
        self.cache.prepare(items, CancellationToken::new()).await
    }

    async fn get_cached_path(&self, id: &str) -> CacheLookup {
        self.cache.lookup(id).await
    }

    async fn get_cached_thumbnail_path(&self, id: &str) -> CacheLookup {
        self.cache.lookup_thumbnail(id).await
    }

    async fn get_cache_size(&self) -> CacheSize {
        self.cache.size().await
    }

    async fn clear_cache(&self) -> ClearCacheResponse {
        let report = self.cache.clear().await;
        let error = if report.is_complete() {
            None
        } else {
            Some(format!(
                "{} file(s) could not be deleted: {}",
                report.errors.len(),
                report.errors.join("; ")
            ))
        };
        ClearCacheResponse {
            success: report.is_complete(),
            deleted_files: report.deleted_files,
            error,
        }
    }

    async fn start_native_drag(
        &self,
        file_paths: Vec<PathBuf>,
        thumbnail_paths: Vec<PathBuf>,
    ) -> DragResponse {
        if file_paths.is_empty() {
            return DragResponse::failed("No files to drag");
        }
        for path in &file_paths {
            if let Err(e) = check_drag_file(path).await {
                warn!(error = %e, "Rejected native drag");
                return DragResponse::failed(e.to_string());
            }
        }

        // A missing icon only costs the preview
        let mut icon = None;
        for path in &thumbnail_paths {
            if check_drag_file(path).await.is_ok() {
                icon = Some(path.as_path());
                break;
            }
        }

        match self.drag.start_drag(&file_paths, icon) {
            Ok(()) => {
                info!(count = file_paths.len(), "Native drag started");
                DragResponse::ok()
            }
            Err(e) => DragResponse::failed(e.to_string()),
        }
    }
}
