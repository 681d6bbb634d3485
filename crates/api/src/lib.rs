//! Driver Monitor API Server
//!
//! Status polling, live MJPEG feed and still-image classification over HTTP.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dms::{Classifier, StatusStore};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod error;
pub mod feed;
pub mod routes;
pub mod settings;

pub use error::ApiError;
pub use feed::FrameFeed;
pub use settings::{AppSettings, LoggingSettings, ServerSettings};

/// Application state shared across handlers. Immutable; the status store
/// and the frame feed carry their own synchronization.
pub struct AppState {
    /// Latest driver status
    pub store: StatusStore,
    /// Latest annotated frame
    pub feed: FrameFeed,
    /// Classifiers for uploaded stills, shared with the capture loop
    pub emotion: Arc<dyn Classifier>,
    pub drowsiness: Arc<dyn Classifier>,
    /// Prometheus recorder, when one is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
    /// Raised once the server starts shutting down; ends open streams
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        store: StatusStore,
        feed: FrameFeed,
        emotion: Arc<dyn Classifier>,
        drowsiness: Arc<dyn Classifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            store,
            feed,
            emotion,
            drowsiness,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            shutdown: watch::channel(false).0,
        }
    }

    /// Tell long-lived responses to finish
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_listener(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub frames_processed: u64,
    /// Seconds since the last published status, if any
    pub last_status_age_seconds: Option<f64>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(routes::status::get_status))
        .route("/video_feed", get(routes::video::video_feed))
        .route("/api/v1/classify", post(routes::classify::classify_image))
        .route("/api/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let latest = state.store.latest();
    let last_status_age_seconds =
        (latest.ts > 0.0).then(|| (dms::status::unix_seconds() - latest.ts).max(0.0));

    Json(HealthResponse {
        status: if state.is_shutting_down() { "shutting_down" } else { "healthy" }.to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        frames_processed: state.feed.frames(),
        last_status_age_seconds,
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("no metrics recorder installed".into()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], handle.render()))
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) {
    let level = settings.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    let result = if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("Failed to set tracing subscriber");
}

/// Serve `state` on `addr` until Ctrl-C
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve_until(listener, state, ctrl_c()).await?;
    Ok(())
}

/// Serve on `listener` until `signal` resolves, then end open video streams
/// and wait for in-flight requests
pub async fn serve_until<F>(listener: TcpListener, state: Arc<AppState>, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown requested");
            state.begin_shutdown();
        })
        .await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
