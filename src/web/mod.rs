//! The HTTP control plane.
//!
//! Read-only introspection plus lock manipulation, authenticated by a
//! shared `secret` header. The route listing at `/` is open; `/dashboard`
//! and `/stats-running` also accept the secret as a query parameter so
//! they work from a browser.

pub mod client;
pub mod extract;
pub mod handlers;

use crate::core::app::SharedState;
use crate::err::Result;
use crate::fsrsync_error_with_source;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
}

const ROUTES: &[(&str, &str)] = &[
    ("GET", "/"),
    ("GET", "/regular_pending"),
    ("GET", "/immediate_pending"),
    ("GET", "/locked_files"),
    ("POST", "/add_to_global_server_lock"),
    ("POST", "/remove_from_global_server_lock"),
    ("POST", "/check_if_server_locked"),
    ("POST", "/delete_file_pending_for_path"),
    ("POST", "/add_locked_files"),
    ("POST", "/remove_locked_files"),
    ("GET", "/dashboard"),
    ("GET", "/stats-running"),
];

async fn list_routes() -> Json<serde_json::Value> {
    let routes: Vec<serde_json::Value> = ROUTES
        .iter()
        .map(|(method, path)| json!({"method": method, "path": path}))
        .collect();
    Json(json!({"routes": routes}))
}

fn query_has_secret(query: Option<&str>, secret: &str) -> bool {
    let Some(query) = query else { return false };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "secret" && value == secret)
}

/// Every route but `/` requires the shared secret. The browser-facing
/// routes may carry it in the query string instead of the header.
async fn require_secret(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == "/" {
        return next.run(request).await;
    }
    let secret = &state.shared.control_secret;
    let header_ok = request
        .headers()
        .get("secret")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false);
    let query_allowed = path == "/dashboard" || path.starts_with("/stats");
    let query_ok = query_allowed && query_has_secret(request.uri().query(), secret);

    if header_ok || query_ok {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "message": "unauthorized"})),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_routes))
        .route("/regular_pending", get(handlers::pending::regular_pending))
        .route(
            "/immediate_pending",
            get(handlers::pending::immediate_pending),
        )
        .route("/locked_files", get(handlers::pending::locked_files))
        .route(
            "/add_to_global_server_lock",
            post(handlers::server_locks::add_to_global_server_lock),
        )
        .route(
            "/remove_from_global_server_lock",
            post(handlers::server_locks::remove_from_global_server_lock),
        )
        .route(
            "/check_if_server_locked",
            post(handlers::server_locks::check_if_server_locked),
        )
        .route(
            "/delete_file_pending_for_path",
            post(handlers::admin::delete_file_pending_for_path),
        )
        .route("/add_locked_files", post(handlers::admin::add_locked_files))
        .route(
            "/remove_locked_files",
            post(handlers::admin::remove_locked_files),
        )
        .route("/dashboard", get(handlers::dashboard::dashboard))
        .route("/stats-running", get(handlers::dashboard::stats_running))
        .layer(middleware::from_fn_with_state(state.clone(), require_secret))
        .with_state(state)
}

/// Bind and serve the control plane. Returns the bound address (useful
/// when the configured port is 0) and the server task.
pub async fn start_control_server(
    shared: Arc<SharedState>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let state = AppState {
        shared: shared.clone(),
    };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((
        shared.control_host.as_str(),
        shared.control_port,
    ))
    .await
    .map_err(|e| {
        fsrsync_error_with_source!(
            Config,
            e,
            "Could not bind control server to {}:{}",
            shared.control_host,
            shared.control_port
        )
    })?;
    let addr = listener
        .local_addr()
        .map_err(|e| fsrsync_error_with_source!(Internal, e, "Could not read bound address"))?;
    shared.logger.info(format!("Web control listening on {}", addr));

    let logger = shared.logger.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            logger.error(format!("Control server exited: {}", e));
        }
    });
    Ok((addr, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_secret_matching() {
        assert!(query_has_secret(Some("secret=abc"), "abc"));
        assert!(query_has_secret(Some("x=1&secret=abc"), "abc"));
        assert!(!query_has_secret(Some("secret=wrong"), "abc"));
        assert!(!query_has_secret(Some("secretx=abc"), "abc"));
        assert!(!query_has_secret(None, "abc"));
    }
}
