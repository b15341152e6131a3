//! Control-plane round-trips over a real loopback listener: secret
//! enforcement, registry snapshots, lock manipulation, and the dashboard.

use fsrsync::config::Config;
use fsrsync::core::SyncApplication;
use fsrsync::utilities::AsyncLogger;
use fsrsync::web::start_control_server;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

const SECRET: &str = "integration-secret";

async fn serve() -> (Arc<fsrsync::core::SharedState>, SocketAddr) {
    let config: Config = serde_json::from_value(json!({
        "hostname": "control-host",
        "control_server_host": "127.0.0.1",
        "control_server_port": 0,
        "control_server_secret": SECRET,
        "destinations": []
    }))
    .expect("valid config");
    let app = SyncApplication::setup(&config, AsyncLogger::disabled(), false).expect("setup");
    let shared = app.shared.clone();
    let (addr, _task) = start_control_server(shared.clone()).await.expect("serve");
    (shared, addr)
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

#[tokio::test]
async fn missing_or_wrong_secret_is_rejected() {
    let (_shared, addr) = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(url(addr, "/regular_pending"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    let resp = client
        .get(url(addr, "/regular_pending"))
        .header("secret", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // The route listing stays open.
    let resp = client.get(url(addr, "/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["routes"].as_array().unwrap().len() >= 10);
}

#[tokio::test]
async fn pending_snapshots_reflect_the_registries() {
    let (shared, addr) = serve().await;
    shared.registries.add_regular("/srv/data/a.txt");
    shared.registries.add_immediate("/srv/data/b.txt");
    shared.registries.add_open("/srv/data/c.txt");

    let client = reqwest::Client::new();
    for (path, expected) in [
        ("/regular_pending", "/srv/data/a.txt"),
        ("/immediate_pending", "/srv/data/b.txt"),
        ("/locked_files", "/srv/data/c.txt"),
    ] {
        let body: Value = client
            .get(url(addr, path))
            .header("secret", SECRET)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let paths: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec![expected], "snapshot at {}", path);
    }
}

#[tokio::test]
async fn server_lock_flow_over_the_wire() {
    let (_shared, addr) = serve().await;
    let client = reqwest::Client::new();

    // host-a takes the lock on backup01.
    let resp = client
        .post(url(addr, "/add_to_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01", "locked_by": "host-a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");

    // A second host is refused with a 4xx error body.
    let resp = client
        .post(url(addr, "/add_to_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01", "locked_by": "host-b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    // Lock state is visible.
    let body: Value = client
        .post(url(addr, "/check_if_server_locked"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], true);

    // Only the owner can release; afterwards the other host gets through.
    let resp = client
        .post(url(addr, "/remove_from_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01", "locked_by": "host-b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(url(addr, "/remove_from_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01", "locked_by": "host-a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(url(addr, "/add_to_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({"server": "backup01", "locked_by": "host-b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn admin_endpoints_manipulate_the_registries() {
    let (shared, addr) = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(url(addr, "/add_locked_files"))
        .header("secret", SECRET)
        .json(&json!({"files": ["/srv/data/x", "/srv/data/y"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(shared.registries.list_open().len(), 2);

    let resp = client
        .post(url(addr, "/remove_locked_files"))
        .header("secret", SECRET)
        .json(&json!({"files": ["/srv/data/x"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(shared.registries.list_open().len(), 1);

    shared.registries.add_regular("/srv/data/pending.txt");
    shared.registries.add_immediate("/srv/data/urgent.txt");
    let resp = client
        .post(url(addr, "/delete_file_pending_for_path"))
        .header("secret", SECRET)
        .json(&json!({"path": "/srv/data/"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(shared.registries.regular_len(), 0);
    assert_eq!(shared.registries.immediate_len(), 0);
    assert!(shared.registries.list_open().is_empty());
}

#[tokio::test]
async fn malformed_bodies_get_the_api_error_shape() {
    let (_shared, addr) = serve().await;
    let client = reqwest::Client::new();

    // Missing required field.
    let resp = client
        .post(url(addr, "/add_to_global_server_lock"))
        .header("secret", SECRET)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(!body["message"].as_str().unwrap().is_empty());

    // Not JSON at all.
    let resp = client
        .post(url(addr, "/check_if_server_locked"))
        .header("secret", SECRET)
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    // JSON body without the JSON content type.
    let resp = client
        .post(url(addr, "/delete_file_pending_for_path"))
        .header("secret", SECRET)
        .body("{\"path\": \"/srv/data/\"}")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn dashboard_and_stats_accept_query_secret() {
    let (_shared, addr) = serve().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(url(addr, &format!("/dashboard?secret={}", SECRET)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page = resp.text().await.unwrap();
    assert!(page.contains("fsrsync"));

    let resp = client
        .get(url(addr, &format!("/stats-running?secret={}", SECRET)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["hostname"], "control-host");

    // Query secret does not open the other routes.
    let resp = client
        .get(url(addr, &format!("/regular_pending?secret={}", SECRET)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
