//! LRU-ordered index of cached entries with byte accounting

use crate::error::Result;
use crate::types::{Artifact, CacheEntry, CachedFile};
use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

const INDEX_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    /// Least recently accessed first
    entries: Vec<CacheEntry>,
}

/// In-memory index; capacity is enforced by the cache in bytes, not here
pub(crate) struct CacheIndex {
    entries: LruCache<String, CacheEntry>,
    total: u64,
}

impl CacheIndex {
    pub(crate) fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Look without refreshing recency
    pub(crate) fn peek(&self, asset_id: &str) -> Option<&CacheEntry> {
        self.entries.peek(asset_id)
    }

    /// Promote to most recently used and bump the access time
    pub(crate) fn touch(&mut self, asset_id: &str) -> Option<&CacheEntry> {
        let entry = self.entries.get_mut(asset_id)?;
        entry.last_accessed_at = Utc::now();
        Some(entry)
    }

    /// Insert or replace an entry as most recently used
    pub(crate) fn upsert(&mut self, entry: CacheEntry) {
        self.total += entry.size_bytes();
        if let Some(old) = self.entries.put(entry.asset_id.clone(), entry) {
            self.total -= old.size_bytes();
        }
    }

    pub(crate) fn remove(&mut self, asset_id: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(asset_id)?;
        self.total -= entry.size_bytes();
        Some(entry)
    }

    /// Drop one artifact; the entry goes away once it holds nothing
    pub(crate) fn remove_artifact(&mut self, asset_id: &str, artifact: Artifact) -> Option<CachedFile> {
        let entry = self.entries.peek_mut(asset_id)?;
        let file = entry.artifact_mut(artifact).take()?;
        let now_empty = entry.is_empty();
        self.total -= file.size;
        if now_empty {
            self.entries.pop(asset_id);
        }
        Some(file)
    }

    /// Asset ids from least to most recently accessed
    pub(crate) fn lru_order(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Load a persisted index; a missing file yields an empty index
    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e.into()),
        };

        let file: IndexFile = serde_json::from_slice(&raw)?;
        for entry in file.entries {
            index.upsert(entry);
        }
        Ok(index)
    }

    /// Persist atomically: write beside the target, then rename over it
    pub(crate) async fn save(&self, path: &Path) -> Result<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            entries: self.entries.iter().rev().map(|(_, v)| v.clone()).collect(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}
