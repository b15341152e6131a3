//! Read-only snapshots of the three registries.

use crate::fs::FileRecordView;
use crate::web::AppState;
use axum::Json;
use axum::extract::State;

pub async fn regular_pending(State(state): State<AppState>) -> Json<Vec<FileRecordView>> {
    Json(
        state
            .shared
            .registries
            .list_regular()
            .iter()
            .map(|r| r.view())
            .collect(),
    )
}

pub async fn immediate_pending(State(state): State<AppState>) -> Json<Vec<FileRecordView>> {
    Json(
        state
            .shared
            .registries
            .list_immediate()
            .iter()
            .map(|r| r.view())
            .collect(),
    )
}

pub async fn locked_files(State(state): State<AppState>) -> Json<Vec<FileRecordView>> {
    Json(
        state
            .shared
            .registries
            .list_open()
            .iter()
            .map(|r| r.view())
            .collect(),
    )
}
