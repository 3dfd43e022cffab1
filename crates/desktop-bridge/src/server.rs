//! HTTP server for the bridge RPC surface
//!
//! Cache operations live under /cache, drag export under /drag, shell
//! state under /session and format conversions under /convert.

use crate::bridge::{CacheBridge, LocalBridge};
use crate::drag::{DragCoordinator, DragHost, DragOutcome};
use crate::error::{BridgeError, Result};
use crate::session::{Preferences, SessionStore, ShellState};
use crate::types::{
    ClearCacheResponse, ClearConversionsResponse, DragResponse, DragStartRequest, HealthResponse, PrepareRequest,
    PreloadCancelResponse, PreloadRequest, PreloadResponse, SelectionDragRequest,
    SelectionUpdate,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use conversion_queue::{ConversionJob, ConversionQueue, ConversionRequest};
use media_cache::{CacheLookup, CacheSize, MediaCache, PrepareReport, PreloadHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<MediaCache>,
    pub bridge: Arc<dyn CacheBridge>,
    pub drag: DragCoordinator,
    pub session: SessionStore,
    pub conversions: ConversionQueue,
    /// Running preloads by view context
    preloads: Mutex<HashMap<String, PreloadHandle>>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        cache: Arc<MediaCache>,
        drag_host: Arc<dyn DragHost>,
        session: SessionStore,
        conversions: ConversionQueue,
    ) -> Self {
        Self {
            bridge: Arc::new(LocalBridge::new(cache.clone(), drag_host.clone())),
            drag: DragCoordinator::new(cache.clone(), drag_host),
            cache,
            session,
            conversions,
            preloads: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// Cancel every running preload
    pub async fn cancel_preloads(&self) {
        for (context, handle) in self.preloads.lock().await.drain() {
            debug!(context = %context, "Cancelling preload");
            handle.cancel();
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cache", delete(clear_cache))
        .route("/cache/prepare", post(prepare_cache))
        .route("/cache/size", get(cache_size))
        .route("/cache/preload", post(start_preload))
        .route("/cache/preload/{context}", delete(cancel_preload))
        .route("/cache/asset/{id}", get(cached_path))
        .route("/cache/asset/{id}/thumbnail", get(cached_thumbnail_path))
        .route("/drag/start", post(start_native_drag))
        .route("/drag/selection", post(drag_selection))
        .route("/session", get(get_session))
        .route("/session/selection", put(set_selection))
        .route("/session/preferences", put(set_preferences))
        .route(
            "/convert",
            post(submit_conversion)
                .get(list_conversions)
                .delete(clear_conversions),
        )
        .route(
            "/convert/{id}",
            get(get_conversion).delete(cancel_conversion),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server; returns once `shutdown` resolves
pub async fn start_server(
    state: SharedState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats().await,
    })
}

async fn prepare_cache(
    State(state): State<SharedState>,
    Json(req): Json<PrepareRequest>,
) -> Json<PrepareReport> {
    Json(state.bridge.prepare_cache(req.items).await)
}

async fn cached_path(State(state): State<SharedState>, Path(id): Path<String>) -> Json<CacheLookup> {
    Json(state.bridge.get_cached_path(&id).await)
}

async fn cached_thumbnail_path(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<CacheLookup> {
    Json(state.bridge.get_cached_thumbnail_path(&id).await)
}

async fn cache_size(State(state): State<SharedState>) -> Json<CacheSize> {
    Json(state.bridge.get_cache_size().await)
}

async fn clear_cache(State(state): State<SharedState>) -> Json<ClearCacheResponse> {
    Json(state.bridge.clear_cache().await)
}

async fn start_preload(
    State(state): State<SharedState>,
    Json(req): Json<PreloadRequest>,
) -> Json<PreloadResponse> {
    let queued = req.items.len().min(state.cache.config().preload_limit.max(1));
    let handle = state.cache.preload(req.items);

    let mut preloads = state.preloads.lock().await;
    preloads.retain(|_, h| !h.is_finished());
    let replaced = match preloads.insert(req.context.clone(), handle) {
        Some(previous) => {
            previous.cancel();
            true
        }
        None => false,
    };
    debug!(context = %req.context, queued, replaced, "Preload started");

    Json(PreloadResponse {
        context: req.context,
        queued,
        replaced,
    })
}

async fn cancel_preload(
    State(state): State<SharedState>,
    Path(context): Path<String>,
) -> Json<PreloadCancelResponse> {
    let handle = state.preloads.lock().await.remove(&context);
    let cancelled = match handle {
        Some(handle) if !handle.is_finished() => {
            handle.cancel();
            true
        }
        _ => false,
    };
    Json(PreloadCancelResponse { context, cancelled })
}

async fn start_native_drag(
    State(state): State<SharedState>,
    Json(req): Json<DragStartRequest>,
) -> Json<DragResponse> {
    Json(
        state
            .bridge
            .start_native_drag(req.file_paths, req.thumbnail_paths)
            .await,
    )
}

async fn drag_selection(
    State(state): State<SharedState>,
    Json(req): Json<SelectionDragRequest>,
) -> Result<Json<DragOutcome>> {
    let selection = state.session.snapshot().await.selection;
    let outcome = state
        .drag
        .begin_drag(&req.dragged_id, &selection, &req.items)
        .await?;
    Ok(Json(outcome))
}

async fn get_session(State(state): State<SharedState>) -> Json<ShellState> {
    Json(state.session.snapshot().await)
}

async fn set_selection(
    State(state): State<SharedState>,
    Json(req): Json<SelectionUpdate>,
) -> Result<Json<ShellState>> {
    Ok(Json(state.session.set_selection(req.selection).await?))
}

async fn set_preferences(
    State(state): State<SharedState>,
    Json(prefs): Json<Preferences>,
) -> Result<Json<ShellState>> {
    Ok(Json(state.session.update_preferences(prefs).await?))
}

async fn submit_conversion(
    State(state): State<SharedState>,
    Json(mut req): Json<ConversionRequest>,
) -> Result<(StatusCode, Json<ConversionJob>)> {
    if req.output_folder.is_none() {
        req.output_folder = state
            .session
            .snapshot()
            .await
            .preferences
            .convert_output_folder;
    }
    let job = state.conversions.submit(req).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_conversions(State(state): State<SharedState>) -> Json<Vec<ConversionJob>> {
    Json(state.conversions.list().await)
}

async fn clear_conversions(State(state): State<SharedState>) -> Json<ClearConversionsResponse> {
    Json(ClearConversionsResponse {
        removed: state.conversions.clear_finished().await,
    })
}

async fn get_conversion(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversionJob>> {
    state
        .conversions
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| BridgeError::NotFound(format!("conversion job {}", id)))
}

async fn cancel_conversion(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversionJob>> {
    Ok(Json(state.conversions.cancel(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drag::LoggingDragHost;
    use crate::test_support::{asset_url, cache_with, gated_cache_with};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use conversion_queue::{ConvertError, Encoder};
    use std::path::PathBuf;
    use tempfile::tempdir;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct InstantEncoder;

    #[async_trait]
    impl Encoder for InstantEncoder {
        async fn encode(
            &self,
            request: &ConversionRequest,
            _progress: watch::Sender<f32>,
        ) -> conversion_queue::Result<PathBuf> {
            if request.id == "broken" {
                return Err(ConvertError::EncoderFailed("exit status: 1".into()));
            }
            let folder = request.output_folder.clone().unwrap_or_default();
            Ok(folder.join(format!("{}.{}", request.id, request.output_format)))
        }
    }

    async fn create_test_state(dir: &std::path::Path, bodies: &[(&str, &str)]) -> SharedState {
        state_with_cache(dir, cache_with(dir, bodies).await).await
    }

    async fn state_with_cache(dir: &std::path::Path, cache: Arc<MediaCache>) -> SharedState {
        let session = SessionStore::load(dir.join("session.json")).await;
        let conversions = ConversionQueue::start(Arc::new(InstantEncoder));
        Arc::new(ServerState::new(
            cache,
            Arc::new(LoggingDragHost::new()),
            session,
            conversions,
        ))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    fn item(id: &str) -> serde_json::Value {
        serde_json::json!({ "id": id, "url": asset_url(id), "type": "video" })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path(), &[]).await);

        let (status, json) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert!(json["cache"]["entries"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_prepare_lookup_size_and_clear() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path(), &[("a", "alpha")]).await);

        let (status, json) = call(
            &router,
            "POST",
            "/cache/prepare",
            Some(serde_json::json!({ "items": [item("a"), item("nope")] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["successCount"], 1);
        assert_eq!(json["totalCount"], 2);
        assert_eq!(json["results"][1]["success"], false);

        let (_, json) = call(&router, "GET", "/cache/asset/a", None).await;
        assert_eq!(json["cached"], true);
        assert!(json["filePath"].as_str().is_some());

        let (_, json) = call(&router, "GET", "/cache/asset/a/thumbnail", None).await;
        assert_eq!(json["cached"], false);

        let (_, json) = call(&router, "GET", "/cache/size", None).await;
        assert_eq!(json["bytes"], 5);
        assert_eq!(json["formatted"], "5 B");

        let (_, json) = call(&router, "DELETE", "/cache", None).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["deletedFiles"], 1);

        let (_, json) = call(&router, "GET", "/cache/asset/a", None).await;
        assert_eq!(json["cached"], false);
    }

    #[tokio::test]
    async fn test_asset_ids_matching_cache_routes() {
        let dir = tempdir().unwrap();
        let router = create_router(
            create_test_state(dir.path(), &[("size", "sss"), ("prepare", "ppp")]).await,
        );

        call(
            &router,
            "POST",
            "/cache/prepare",
            Some(serde_json::json!({ "items": [item("size"), item("prepare")] })),
        )
        .await;

        for id in ["size", "prepare"] {
            let (status, json) = call(&router, "GET", &format!("/cache/asset/{id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["cached"], true, "asset {id}");
        }
        let (_, json) = call(&router, "GET", "/cache/size", None).await;
        assert_eq!(json["bytes"], 6);
    }

    #[tokio::test]
    async fn test_malformed_prepare_body_rejected() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path(), &[]).await);

        let (status, _) = call(
            &router,
            "POST",
            "/cache/prepare",
            Some(serde_json::json!({ "things": [] })),
        )
        .await;
        assert!(status.is_client_error());
    }

    async fn wait_for_in_flight(cache: &MediaCache, expected: usize) {
        for _ in 0..200 {
            if cache.stats().await.in_flight == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {expected} downloads in flight");
    }

    #[tokio::test]
    async fn test_preload_replaces_same_context() {
        let dir = tempdir().unwrap();
        let (cache, _gate) =
            gated_cache_with(dir.path(), &[("a", "alpha"), ("b", "beta")], &["a"]).await;
        let state = state_with_cache(dir.path(), cache.clone()).await;
        let router = create_router(state.clone());

        let (_, first) = call(
            &router,
            "POST",
            "/cache/preload",
            Some(serde_json::json!({ "context": "grid", "items": [item("a")] })),
        )
        .await;
        assert_eq!(first["queued"], 1);
        assert_eq!(first["replaced"], false);
        wait_for_in_flight(&cache, 1).await;

        let (_, second) = call(
            &router,
            "POST",
            "/cache/preload",
            Some(serde_json::json!({ "context": "grid", "items": [item("b")] })),
        )
        .await;
        assert_eq!(second["context"], "grid");
        assert_eq!(second["replaced"], true);

        // The blocked fetch of "a" only goes away if the first run was cancelled
        for _ in 0..200 {
            if cache.lookup("b").await.cached {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(cache.lookup("b").await.cached);
        wait_for_in_flight(&cache, 0).await;
        assert!(!cache.lookup("a").await.cached);

        let preloads = state.preloads.lock().await;
        assert!(preloads.get("grid").is_some_and(|h| !h.is_cancelled()));
    }

    #[tokio::test]
    async fn test_cancel_running_preload() {
        let dir = tempdir().unwrap();
        let (cache, _gate) = gated_cache_with(dir.path(), &[("a", "alpha")], &["a"]).await;
        let state = state_with_cache(dir.path(), cache.clone()).await;
        let router = create_router(state.clone());

        call(
            &router,
            "POST",
            "/cache/preload",
            Some(serde_json::json!({ "context": "grid", "items": [item("a")] })),
        )
        .await;
        wait_for_in_flight(&cache, 1).await;

        let (status, json) = call(&router, "DELETE", "/cache/preload/grid", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["context"], "grid");
        assert_eq!(json["cancelled"], true);
        wait_for_in_flight(&cache, 0).await;
        assert!(state.preloads.lock().await.is_empty());

        let (_, json) = call(&router, "DELETE", "/cache/preload/grid", None).await;
        assert_eq!(json["cancelled"], false);
        let (_, json) = call(&router, "DELETE", "/cache/preload/other", None).await;
        assert_eq!(json["cancelled"], false);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all_preloads() {
        let dir = tempdir().unwrap();
        let (cache, _gate) =
            gated_cache_with(dir.path(), &[("a", "alpha"), ("b", "beta")], &["a", "b"]).await;
        let state = state_with_cache(dir.path(), cache.clone()).await;
        let router = create_router(state.clone());

        for (context, id) in [("grid", "a"), ("detail", "b")] {
            call(
                &router,
                "POST",
                "/cache/preload",
                Some(serde_json::json!({ "context": context, "items": [item(id)] })),
            )
            .await;
        }
        wait_for_in_flight(&cache, 2).await;

        state.cancel_preloads().await;
        assert!(state.preloads.lock().await.is_empty());
        wait_for_in_flight(&cache, 0).await;
    }

    #[tokio::test]
    async fn test_native_drag_endpoint() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path(), &[]).await);

        let (status, json) = call(
            &router,
            "POST",
            "/drag/start",
            Some(serde_json::json!({ "filePaths": ["/definitely/not/here.mp4"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_selection_drag_uses_session_selection() {
        let dir = tempdir().unwrap();
        let router =
            create_router(create_test_state(dir.path(), &[("a", "alpha"), ("b", "beta")]).await);

        call(
            &router,
            "POST",
            "/cache/prepare",
            Some(serde_json::json!({ "items": [item("a"), item("b")] })),
        )
        .await;
        let (status, _) = call(
            &router,
            "PUT",
            "/session/selection",
            Some(serde_json::json!({ "selection": ["b", "a"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = call(
            &router,
            "POST",
            "/drag/selection",
            Some(serde_json::json!({ "draggedId": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "started");
        assert_eq!(json["files"].as_array().unwrap().len(), 2);

        let (_, json) = call(
            &router,
            "POST",
            "/drag/selection",
            Some(serde_json::json!({ "draggedId": "zzz" })),
        )
        .await;
        assert_eq!(json["outcome"], "deferred");
        assert_eq!(json["pending"][0], "zzz");
    }

    #[tokio::test]
    async fn test_session_preferences_round_trip() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path(), &[]).await);

        let (status, json) = call(
            &router,
            "PUT",
            "/session/preferences",
            Some(serde_json::json!({ "viewMode": "list", "gridColumns": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["preferences"]["viewMode"], "list");

        let (status, json) = call(
            &router,
            "PUT",
            "/session/preferences",
            Some(serde_json::json!({ "gridColumns": 40 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("gridColumns"));

        let (_, json) = call(&router, "GET", "/session", None).await;
        assert_eq!(json["preferences"]["gridColumns"], 3);
    }

    #[tokio::test]
    async fn test_conversion_endpoints() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path(), &[]).await;
        let router = create_router(state.clone());

        call(
            &router,
            "PUT",
            "/session/preferences",
            Some(serde_json::json!({ "convertOutputFolder": "/exports" })),
        )
        .await;

        let (status, json) = call(
            &router,
            "POST",
            "/convert",
            Some(serde_json::json!({
                "id": "job-1",
                "filePath": "/media/in/clip.mov",
                "outputFormat": "mp4",
                "outputType": "video"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["request"]["outputFolder"], "/exports");

        let mut finished = serde_json::Value::Null;
        for _ in 0..200 {
            let (_, json) = call(&router, "GET", "/convert/job-1", None).await;
            if json["status"] == "completed" {
                finished = json;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(finished["outputPath"], "/exports/job-1.mp4");

        let (_, json) = call(&router, "GET", "/convert", None).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let (status, _) = call(&router, "GET", "/convert/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "DELETE", "/convert/job-1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) = call(&router, "DELETE", "/convert", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], 1);
        let (_, json) = call(&router, "GET", "/convert", None).await;
        assert!(json.as_array().unwrap().is_empty());

        let (status, _) = call(
            &router,
            "POST",
            "/convert",
            Some(serde_json::json!({
                "id": "job-2",
                "filePath": "/media/in/clip.mov",
                "outputFormat": "mp4",
                "outputType": "video",
                "trimStart": 5.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
