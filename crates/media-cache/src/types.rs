//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of media an asset holds; drives the fallback file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Video,
    Audio,
    Image,
    #[default]
    #[serde(other)]
    Other,
}

impl AssetKind {
    pub fn default_extension(self) -> &'static str {
        match self {
            AssetKind::Video => "mp4",
            AssetKind::Audio => "mp3",
            AssetKind::Image => "png",
            AssetKind::Other => "bin",
        }
    }
}

/// A remote asset the caller wants available locally
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: AssetKind,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl AssetDescriptor {
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            id: id.into(),
            file_name: None,
            url: url.into(),
            kind,
            thumbnail_url: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }
}

/// The two artifacts an entry can carry, each with its own lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Artifact {
    Primary,
    Thumbnail,
}

/// A fully written file owned by the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Metadata for a cached asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub asset_id: String,
    pub file_name: String,
    pub source_url: String,
    pub primary: Option<CachedFile>,
    pub thumbnail: Option<CachedFile>,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(asset_id: &str, file_name: &str, source_url: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            file_name: file_name.to_string(),
            source_url: source_url.to_string(),
            primary: None,
            thumbnail: None,
            last_accessed_at: Utc::now(),
        }
    }

    /// Bytes on disk across both artifacts
    pub fn size_bytes(&self) -> u64 {
        self.primary.as_ref().map_or(0, |f| f.size) + self.thumbnail.as_ref().map_or(0, |f| f.size)
    }

    pub fn artifact(&self, artifact: Artifact) -> Option<&CachedFile> {
        match artifact {
            Artifact::Primary => self.primary.as_ref(),
            Artifact::Thumbnail => self.thumbnail.as_ref(),
        }
    }

    pub fn artifact_mut(&mut self, artifact: Artifact) -> &mut Option<CachedFile> {
        match artifact {
            Artifact::Primary => &mut self.primary,
            Artifact::Thumbnail => &mut self.thumbnail,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.thumbnail.is_none()
    }
}

/// Answer to "is asset X cached, and where"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLookup {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl CacheLookup {
    pub fn hit(path: PathBuf) -> Self {
        Self {
            cached: true,
            file_path: Some(path),
        }
    }

    pub fn miss() -> Self {
        Self {
            cached: false,
            file_path: None,
        }
    }
}

/// Bytes used against the configured ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSize {
    pub bytes: u64,
    pub formatted: String,
    pub max_size: u64,
    pub max_formatted: String,
}

/// Outcome of clearing the whole cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub deleted_files: usize,
    pub errors: Vec<String>,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-item result of a batch preparation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareItemResult {
    pub id: String,
    pub file_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch preparation result, in request order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareReport {
    pub success: bool,
    pub results: Vec<PrepareItemResult>,
    pub success_count: usize,
    pub total_count: usize,
}

impl PrepareReport {
    pub fn from_results(results: Vec<PrepareItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let total_count = results.len();
        Self {
            success: success_count == total_count,
            results,
            success_count,
            total_count,
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub downloads: u64,
    pub evictions: u64,
    /// Downloads currently running
    #[serde(default)]
    pub in_flight: usize,
}
