//! Human- and machine-readable views of live state.

use crate::web::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::Html;
use serde_json::json;

/// A plain HTML table of the statistics ring per destination.
pub async fn dashboard(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from(
        "<html><head><title>fsrsync dashboard</title></head><body><h1>fsrsync</h1>",
    );
    for dest in &state.shared.destinations {
        page.push_str(&format!(
            "<h2>{} &rarr; {}:{}</h2>",
            dest.path, dest.remote_endpoint, dest.remote_path
        ));
        page.push_str(
            "<table border=\"1\"><tr><th>time</th><th>type</th><th>result</th>\
             <th>notification</th><th>hooks</th><th>regular</th><th>immediate</th></tr>",
        );
        for entry in dest.statistics_snapshot() {
            page.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:?}</td><td>{:?}</td>\
                 <td>{}</td><td>{}</td></tr>",
                entry.last_sync,
                entry.log_type,
                entry.result,
                entry.notification_result,
                entry.hooks_ok,
                entry.regular_sync_files_count,
                entry.immediate_sync_files_count,
            ));
        }
        page.push_str("</table>");
    }
    page.push_str("</body></html>");
    Html(page)
}

/// The live state as JSON: per-destination pending work and statistics,
/// plus the lock table and the open-file set.
pub async fn stats_running(State(state): State<AppState>) -> Json<serde_json::Value> {
    let shared = &state.shared;
    let destinations: Vec<serde_json::Value> = shared
        .destinations
        .iter()
        .map(|dest| {
            json!({
                "path": dest.path,
                "destination": dest.remote_endpoint,
                "destination_path": dest.remote_path,
                "event_queue_limit": dest.event_queue_limit,
                "locked_on_sync": dest.locked_on_sync.load(std::sync::atomic::Ordering::Acquire),
                "last_full_sync": dest.last_full_sync_string(),
                "pending_regular": shared.registries.list_regular_for_prefix(&dest.path).len(),
                "pending_immediate": shared.registries.list_immediate_for_prefix(&dest.path).len(),
                "statistics": dest.statistics_snapshot(),
            })
        })
        .collect();
    let open_files: Vec<_> = shared.registries.list_open().iter().map(|r| r.view()).collect();
    Json(json!({
        "hostname": shared.hostname,
        "destinations": destinations,
        "server_locks": shared.coordinator.snapshot(),
        "open_files": open_files,
    }))
}
