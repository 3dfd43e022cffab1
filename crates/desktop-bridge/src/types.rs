//! Wire types for the bridge RPC surface

use media_cache::{AssetDescriptor, CacheStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub items: Vec<AssetDescriptor>,
}

/// Result of `clearCache`; partial success reports what was deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub success: bool,
    pub deleted_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragStartRequest {
    pub file_paths: Vec<PathBuf>,
    #[serde(default)]
    pub thumbnail_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DragResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Drag of the dragged item, or of the whole selection when it is part of it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionDragRequest {
    pub dragged_id: String,
    /// Descriptors for the items in view, used to fetch anything not cached yet
    #[serde(default)]
    pub items: Vec<AssetDescriptor>,
}

/// Background priming for a view; `context` names the view so a newer
/// preload replaces an older one
#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    pub context: String,
    pub items: Vec<AssetDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct PreloadResponse {
    pub context: String,
    pub queued: usize,
    /// A previous preload for the same context was cancelled
    pub replaced: bool,
}

#[derive(Debug, Serialize)]
pub struct PreloadCancelResponse {
    pub context: String,
    pub cancelled: bool,
}

/// Finished conversion jobs dropped from the queue
#[derive(Debug, Serialize)]
pub struct ClearConversionsResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct SelectionUpdate {
    pub selection: Vec<String>,
}
