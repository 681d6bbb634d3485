//! Status Routes

use std::sync::Arc;

use axum::{extract::State, Json};
use dms::FlatStatus;

use crate::AppState;

/// Latest published driver status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<FlatStatus> {
    Json(state.store.snapshot().to_flat())
}
