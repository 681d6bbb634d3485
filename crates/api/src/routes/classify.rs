//! Still-image Classification

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use camera_capture::decode_image;
use dms::classifier::classify;
use dms::ClassificationResult;
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

/// Response for the classify endpoint
#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub width: u32,
    pub height: u32,
    pub emotion: ClassificationResult,
    pub drowsiness: ClassificationResult,
}

/// Run both classifiers on an uploaded image (the whole image is the crop)
pub async fn classify_image(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty image body".into()));
    }

    let emotion = Arc::clone(&state.emotion);
    let drowsiness = Arc::clone(&state.drowsiness);
    let response = tokio::task::spawn_blocking(move || -> Result<ClassifyResponse, ApiError> {
        let image = decode_image(&body, 0, 0)
            .and_then(|frame| frame.to_rgb_image())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(ClassifyResponse {
            width: image.width(),
            height: image.height(),
            emotion: classify(&image, emotion.as_ref())?,
            drowsiness: classify(&image, drowsiness.as_ref())?,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(
        "Classified upload {}x{}: {} / {}",
        response.width, response.height, response.emotion.label, response.drowsiness.label
    );
    Ok(Json(response))
}
