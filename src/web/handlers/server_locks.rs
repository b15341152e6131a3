//! Global server-lock manipulation for peer hosts.

use crate::web::AppState;
use crate::web::extract::ApiJson;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

/// `server` names the lock entry (the remote host being pushed to);
/// `locked_by` is the source host announcing itself. Absent `locked_by`
/// falls back to `server`, which keeps single-field callers working.
#[derive(Debug, Deserialize)]
pub struct LockPayload {
    pub server: String,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl LockPayload {
    fn owner(&self) -> &str {
        self.locked_by.as_deref().unwrap_or(&self.server)
    }
}

pub async fn add_to_global_server_lock(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LockPayload>,
) -> Response {
    let acquired = state
        .shared
        .coordinator
        .acquire(&payload.server, payload.owner());
    state.shared.logger.info(format!(
        "Added lock for server {}, result: {}",
        payload.server, acquired
    ));
    if acquired {
        Json(json!({"status": "success"})).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "error",
                "message": format!("server {} is locked by another host", payload.server)
            })),
        )
            .into_response()
    }
}

pub async fn remove_from_global_server_lock(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LockPayload>,
) -> Response {
    let released = state
        .shared
        .coordinator
        .release(&payload.server, payload.owner());
    state.shared.logger.info(format!(
        "Removed lock for server {}, result: {}",
        payload.server, released
    ));
    if released {
        Json(json!({"status": "success"})).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "error",
                "message": format!("server {} is locked by another host", payload.server)
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckPayload {
    pub server: String,
}

pub async fn check_if_server_locked(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CheckPayload>,
) -> Json<serde_json::Value> {
    Json(json!({"status": state.shared.coordinator.check(&payload.server)}))
}
