//! Driver Monitor - Main Entry Point
//!
//! Usage: `dms-monitor [config-path]`

use std::path::PathBuf;
use std::sync::Arc;

use api::{init_logging, run_server, AppSettings, AppState, FrameFeed};
use camera_capture::{open_source, CaptureInput};
use dms::{FrameOrchestrator, Monitor, StatusStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = AppSettings::load(config_path.as_deref())?;
    init_logging(&settings.logging);

    info!("=== Driver Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    // Models and the frame source are required; fail before serving anything
    let store = StatusStore::new();
    let orchestrator = FrameOrchestrator::from_config(&settings.dms, store.clone())?;
    let source = open_source(&settings.capture)?;
    match settings.capture.input {
        CaptureInput::Camera => info!("Capturing from camera {}", settings.capture.device),
        CaptureInput::Stills => info!("Replaying stills from {}", settings.capture.source.display()),
    }

    let feed = FrameFeed::new(settings.dms.jpeg_quality);
    let state = Arc::new(AppState::new(
        store,
        feed.clone(),
        orchestrator.emotion_classifier(),
        orchestrator.drowsiness_classifier(),
        metrics,
    ));

    let mut monitor = Monitor::start(source, orchestrator, feed)?;
    let served = run_server(&settings.server.addr, state).await;

    tokio::task::spawn_blocking(move || monitor.stop()).await?;
    served
}
