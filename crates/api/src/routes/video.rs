//! Live MJPEG Feed

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::stream;
use tokio::sync::watch;
use tracing::debug;

use crate::feed::{mjpeg_part, BOUNDARY};
use crate::AppState;

/// Stream every newly published frame as a `multipart/x-mixed-replace` part,
/// starting with the current one. The stream ends when the server shuts down.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    let frames = state.feed.subscribe();
    let shutdown = state.shutdown_listener();
    let parts = stream::unfold(
        (frames, shutdown, true),
        |(mut frames, mut shutdown, first)| async move {
            let jpeg = next_jpeg(&mut frames, &mut shutdown, first).await?;
            Some((Ok::<Bytes, Infallible>(mjpeg_part(&jpeg)), (frames, shutdown, false)))
        },
    );

    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}")),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

async fn next_jpeg(
    frames: &mut watch::Receiver<Option<Bytes>>,
    shutdown: &mut watch::Receiver<bool>,
    first: bool,
) -> Option<Bytes> {
    if *shutdown.borrow() {
        return None;
    }
    if first {
        if let Some(jpeg) = frames.borrow_and_update().clone() {
            return Some(jpeg);
        }
    }
    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    debug!("Frame feed closed");
                    return None;
                }
            }
            _ = stopped(shutdown) => {
                debug!("Ending video stream for shutdown");
                return None;
            }
        }
        if let Some(jpeg) = frames.borrow_and_update().clone() {
            return Some(jpeg);
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}
