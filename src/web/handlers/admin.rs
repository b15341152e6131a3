//! Administrative control over the registries.

use crate::web::AppState;
use crate::web::extract::ApiJson;
use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct PathPayload {
    pub path: String,
}

/// Drop every pending record under the given prefix, all three sets.
pub async fn delete_file_pending_for_path(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PathPayload>,
) -> Json<serde_json::Value> {
    state.shared.registries.delete_all_for_prefix(&payload.path);
    state.shared.logger.info(format!(
        "Cleared pending files under {} via control plane",
        payload.path
    ));
    Json(json!({"status": "success"}))
}

#[derive(Debug, Deserialize)]
pub struct FilesPayload {
    #[serde(default)]
    pub files: Vec<String>,
}

pub async fn add_locked_files(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<FilesPayload>,
) -> Json<serde_json::Value> {
    for file in &payload.files {
        state.shared.registries.add_open(file);
    }
    Json(json!({"status": "success"}))
}

pub async fn remove_locked_files(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<FilesPayload>,
) -> Json<serde_json::Value> {
    for file in &payload.files {
        state.shared.registries.remove_open(file);
    }
    Json(json!({"status": "success"}))
}
