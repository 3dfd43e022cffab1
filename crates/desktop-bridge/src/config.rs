use media_cache::CacheConfig;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_CACHE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Bridge configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    pub cache_dir: PathBuf,
    pub max_cache_size: u64,
    pub download_concurrency: usize,
    pub preload_limit: usize,
    pub fetch_timeout: Duration,
    pub session_file: PathBuf,
    pub ffmpeg_path: PathBuf,
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(3010);

        let bind_addr = var("BIND_ADDR")
            .and_then(|a| a.parse().ok())
            .unwrap_or(IpAddr::from([127, 0, 0, 1]));

        let cache_dir = var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./cache/media"));

        let max_cache_size = var("MAX_CACHE_SIZE")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CACHE_SIZE);

        let download_concurrency = var("DOWNLOAD_CONCURRENCY")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4)
            .max(1);

        let preload_limit = var("PRELOAD_LIMIT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(24)
            .max(1);

        let fetch_timeout = var("FETCH_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let session_file = var("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./cache/session.json"));

        let ffmpeg_path = var("FFMPEG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));

        Self {
            port,
            bind_addr,
            cache_dir,
            max_cache_size,
            download_concurrency,
            preload_limit,
            fetch_timeout,
            session_file,
            ffmpeg_path,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            cache_dir: self.cache_dir.clone(),
            max_size: self.max_cache_size,
            download_concurrency: self.download_concurrency,
            preload_limit: self.preload_limit,
        }
    }
}
