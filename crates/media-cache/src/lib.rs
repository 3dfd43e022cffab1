//! Bounded on-disk media cache
//!
//! Keeps local copies of remote media assets under a single cache root,
//! accounts their size against a byte ceiling and evicts least recently
//! accessed entries to make room. Concurrent requests for the same asset
//! share one download.

mod cache;
mod error;
mod fetcher;
mod index;
mod naming;
mod types;

pub use cache::{CacheConfig, MediaCache, PreloadHandle};
pub use error::{CacheError, Result};
pub use fetcher::{HttpFetcher, MediaFetcher};
pub use naming::{cache_key, derive_file_name, format_bytes, sanitize_file_name};
pub use types::{
    Artifact, AssetDescriptor, AssetKind, CacheEntry, CacheLookup, CacheSize, CacheStats,
    CachedFile, ClearReport, PrepareItemResult, PrepareReport,
};
