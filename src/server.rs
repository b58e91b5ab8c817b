//! HTTP front end: MJPEG stream, single picture, health and stats endpoints

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, info_span, Instrument};

use crate::config::Config;
use crate::frame::Frame;
use crate::sink::BodySink;
use crate::source::{encode_solid_jpeg, FrameSource};
use crate::streamer::{MjpegWriter, StatsSnapshot, StreamError, StreamResult, StreamStats};

/// Web server state
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    animation: Arc<dyn FrameSource>,
    picture: Frame,
    writer: MjpegWriter,
    stats: Arc<StreamStats>,
}

impl AppState {
    /// Builds the demo animation, still picture and writer from `config`.
    ///
    /// Streams end with `Cancelled` once `shutdown` turns true.
    pub fn new(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let anim = &config.animation;

        let animation = anim
            .build_pattern()
            .context("failed to build animation")?;

        let first = anim
            .rgb_colors()?
            .first()
            .copied()
            .context("animation has no colors")?;
        let picture = encode_solid_jpeg(first, anim.width, anim.height, anim.quality)
            .context("failed to encode picture")?;

        let writer = MjpegWriter::from_config(&config.stream)
            .context("invalid stream configuration")?
            .with_shutdown(shutdown);

        Ok(Self {
            config,
            animation: Arc::new(animation),
            picture,
            writer,
            stats: Arc::new(StreamStats::new()),
        })
    }

    /// Replaces the source behind `/animation`
    pub fn with_animation(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.animation = source;
        self
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

/// Builds the router
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_root);

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/animation", get(animation_handler))
        .route("/picture", get(picture_handler))
        .merge(api)
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves on an already bound listener until `shutdown` turns true
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // A dropped sender also counts as shutdown
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Web server shutting down");
        })
        .await?;

    Ok(())
}

/// Start the web server
pub async fn run_server(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let state = AppState::new(Arc::clone(&config), shutdown.clone())?;

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Starting web server on http://{}", listener.local_addr()?);
    info!(
        static_root = %config.server.static_root.display(),
        boundary = %state.writer.boundary(),
        "Serving /animation, /picture, /health, /api/stats"
    );

    serve(listener, state, shutdown).await
}

/// MJPEG stream handler
async fn animation_handler(State(state): State<AppState>) -> Response {
    let session_id = state.stats.session_started();
    let (mut sink, body) = BodySink::new();

    if let Err(e) = state.writer.check_sink(&sink) {
        error!(session_id, error = %e, "Cannot stream to this connection");
        state.stats.session_finished(&Err(e));
        return (StatusCode::INTERNAL_SERVER_ERROR, "streaming unsupported").into_response();
    }

    // Headers go out before the first frame
    let response = stream_response(&state.writer, body);

    let frames = state.animation.open();
    let writer = state.writer.clone();
    let stats = Arc::clone(&state.stats);

    tokio::spawn(
        async move {
            let result = writer.stream_frames(&mut sink, frames).await;
            log_outcome(&result);
            stats.session_finished(&result);
        }
        .instrument(info_span!("mjpeg_session", session_id)),
    );

    response
}

fn stream_response(writer: &MjpegWriter, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, writer.content_type()),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::CONNECTION, "close".to_string()),
        ],
        body,
    )
        .into_response()
}

fn log_outcome(result: &StreamResult) {
    match result {
        Ok(_) => {}
        // Source faults are logged by the writer itself
        Err(StreamError::Source { .. }) => {}
        Err(e) => error!(error = %e, "Stream aborted"),
    }
}

/// Single picture handler
async fn picture_handler(State(state): State<AppState>) -> Response {
    let frame = &state.picture;

    (
        [
            (header::CONTENT_TYPE, frame.mime_type().to_string()),
            (header::CONTENT_LENGTH, frame.len().to_string()),
        ],
        frame.payload().clone(),
    )
        .into_response()
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Stats API handler
async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        let (_tx, rx) = watch::channel(false);
        AppState::new(Arc::new(Config::default()), rx).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_picture_headers() {
        let response = router(state())
            .oneshot(Request::get("/picture").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let length: usize = response.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), length);
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_animation_headers() {
        let response = router(state())
            .oneshot(Request::get("/animation").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=abcd4321"
        );
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::CONNECTION], "close");
    }
}
