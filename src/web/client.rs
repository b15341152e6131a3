//! HTTP client for a peer's control plane.
//!
//! Lock acquisition and release are mirrored onto the peer so two source
//! hosts pushing into the same remote observe each other. Any transport
//! failure or non-success body counts as a failed notification; the caller
//! treats that as "do not sync this cycle".

use crate::constants::DEFAULT_HTTP_TIMEOUT;
use crate::err::Result;
use crate::fsrsync_error_with_source;
use crate::utilities::AsyncLogger;
use serde_json::{Value, json};

pub struct WebClient {
    host: String,
    port: u16,
    secret: String,
    client: reqwest::Client,
    logger: AsyncLogger,
}

impl WebClient {
    pub fn new(host: &str, port: u16, secret: &str, logger: AsyncLogger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| fsrsync_error_with_source!(PeerLock, e, "Failed to build HTTP client"))?;
        Ok(Self {
            host: host.to_string(),
            port,
            secret: secret.to_string(),
            client,
            logger,
        })
    }

    /// A client with no peer configured; every call reports failure.
    pub fn configured(&self) -> bool {
        !self.host.is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .header("secret", &self.secret)
            .send()
            .await
            .map_err(|e| fsrsync_error_with_source!(PeerLock, e, "GET {} failed", url))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| fsrsync_error_with_source!(PeerLock, e, "GET {} returned non-JSON", url))?;
        self.logger
            .debug(format!("GET request to {}, response: {}", url, body));
        Ok(body)
    }

    pub async fn post(&self, path: &str, data: Value) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .header("secret", &self.secret)
            .json(&data)
            .send()
            .await
            .map_err(|e| fsrsync_error_with_source!(PeerLock, e, "POST {} failed", url))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| fsrsync_error_with_source!(PeerLock, e, "POST {} returned non-JSON", url))?;
        self.logger.debug(format!(
            "POST request to {} with data {}, response: {}",
            url, data, body
        ));
        Ok(body)
    }

    fn body_is_success(body: &Value) -> bool {
        body.get("status").and_then(Value::as_str) == Some("success")
    }

    /// Record on the peer that `locked_by` is pushing into `server`.
    pub async fn add_to_global_server_lock(&self, server: &str, locked_by: &str) -> bool {
        if !self.configured() {
            return false;
        }
        match self
            .post(
                "/add_to_global_server_lock",
                json!({"server": server, "locked_by": locked_by}),
            )
            .await
        {
            Ok(body) => Self::body_is_success(&body),
            Err(e) => {
                self.logger
                    .error(format!("Peer lock add for {} failed: {}", server, e));
                false
            }
        }
    }

    pub async fn remove_from_global_server_lock(&self, server: &str, locked_by: &str) -> bool {
        if !self.configured() {
            return false;
        }
        match self
            .post(
                "/remove_from_global_server_lock",
                json!({"server": server, "locked_by": locked_by}),
            )
            .await
        {
            Ok(body) => Self::body_is_success(&body),
            Err(e) => {
                self.logger
                    .error(format!("Peer lock remove for {} failed: {}", server, e));
                false
            }
        }
    }

    pub async fn check_if_server_locked(&self, server: &str) -> Result<bool> {
        let body = self
            .post("/check_if_server_locked", json!({"server": server}))
            .await?;
        Ok(body.get("status").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn add_locked_files(&self, files: &[String]) -> bool {
        if !self.configured() {
            return false;
        }
        match self.post("/add_locked_files", json!({"files": files})).await {
            Ok(body) => Self::body_is_success(&body),
            Err(e) => {
                self.logger
                    .error(format!("Peer add_locked_files failed: {}", e));
                false
            }
        }
    }

    pub async fn remove_locked_files(&self, files: &[String]) -> bool {
        if !self.configured() {
            return false;
        }
        match self
            .post("/remove_locked_files", json!({"files": files}))
            .await
        {
            Ok(body) => Self::body_is_success(&body),
            Err(e) => {
                self.logger
                    .error(format!("Peer remove_locked_files failed: {}", e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_reports_failure_without_io() {
        let client = WebClient::new("", 8080, "secret", AsyncLogger::disabled()).unwrap();
        assert!(!client.configured());
        assert!(!client.add_to_global_server_lock("backup01", "host-a").await);
        assert!(!client.remove_from_global_server_lock("backup01", "host-a").await);
        assert!(!client.add_locked_files(&["/src/a".to_string()]).await);
    }

    #[test]
    fn success_body_detection() {
        assert!(WebClient::body_is_success(&json!({"status": "success"})));
        assert!(!WebClient::body_is_success(&json!({"status": "error"})));
        assert!(!WebClient::body_is_success(&json!({})));
    }
}
