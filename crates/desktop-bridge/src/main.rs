//! Desktop bridge - host side of the desktop shell
//!
//! Serves the shell's local file work over a loopback JSON API: the media
//! cache, native drag export, persisted shell state and format conversion.

mod bridge;
mod config;
mod drag;
mod error;
mod server;
mod session;
mod types;

#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::drag::LoggingDragHost;
use crate::error::{BridgeError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::session::SessionStore;
use conversion_queue::{ConversionQueue, FfmpegEncoder};
use media_cache::{format_bytes, HttpFetcher, MediaCache};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("desktop_bridge=info".parse()?)
        .add_directive("media_cache=info".parse()?)
        .add_directive("conversion_queue=info".parse()?);

    // Use JSON format for structured log collection when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting desktop bridge...");

    let config = Config::from_env();
    info!("Listening on: {}:{}", config.bind_addr, config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Max cache size: {}", format_bytes(config.max_cache_size));
    info!(
        "Download concurrency: {}, preload limit: {}",
        config.download_concurrency, config.preload_limit
    );

    let fetcher = HttpFetcher::new(config.fetch_timeout)?;
    let cache = MediaCache::new(config.cache_config(), Arc::new(fetcher));
    cache.init().await?;

    let session = SessionStore::load(&config.session_file).await;
    let conversions = ConversionQueue::start(Arc::new(FfmpegEncoder::new(&config.ffmpeg_path)));

    let state: SharedState = Arc::new(ServerState::new(
        cache,
        Arc::new(LoggingDragHost::new()),
        session,
        conversions,
    ));

    let addr = SocketAddr::new(config.bind_addr, config.port);
    start_server(state.clone(), addr, shutdown_signal())
        .await
        .map_err(|e| BridgeError::Config(format!("Server error: {}", e)))?;

    info!("Shutting down...");
    state.cancel_preloads().await;
    state.conversions.shutdown().await;
    if let Err(e) = state.cache.flush().await {
        warn!(error = %e, "Failed to write cache index on shutdown");
    }
    if let Err(e) = state.session.save().await {
        warn!(error = %e, "Failed to save session on shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
