//! JSON-RPC client for the `lbrynet` daemon
//!
//! Response schemas are interpreted here and nowhere else; the rest of the
//! crate only sees [`ResolvedClaim`] and [`DownloadState`].

use super::types::{DaemonError, DaemonStatus, DownloadState, ResolvedClaim};
use crate::config::DaemonConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

/// Operations the pipeline needs from the content daemon
#[async_trait]
pub trait ContentDaemon: Send + Sync {
    /// Probes the daemon
    async fn status(&self) -> Result<DaemonStatus, DaemonError>;

    /// Resolves a canonical `lbry://` URI to its claim
    async fn resolve(&self, uri: &str) -> Result<ResolvedClaim, DaemonError>;

    /// Asks the daemon to download `uri` into `dir`; returns immediately
    async fn start_download(&self, uri: &str, dir: &Path) -> Result<DownloadState, DaemonError>;

    /// Current state of the download for `claim_id`
    async fn download_status(&self, claim_id: &str) -> Result<DownloadState, DaemonError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileItem {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    download_path: Option<String>,
    #[serde(default)]
    written_bytes: Option<u64>,
    #[serde(default)]
    total_bytes: Option<u64>,
}

impl FileItem {
    fn state(&self) -> DownloadState {
        if self.completed {
            return DownloadState::Completed {
                path: self.download_path.clone(),
            };
        }

        let progress = match (self.written_bytes, self.total_bytes) {
            (Some(written), Some(total)) if total > 0 => Some(written as f64 / total as f64),
            _ => None,
        };

        match self.status.as_deref() {
            Some("running") => DownloadState::Running { progress },
            Some("stopped") => DownloadState::Errored {
                reason: "download stopped before completion".to_string(),
            },
            _ => DownloadState::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileListPage {
    #[serde(default)]
    items: Vec<FileItem>,
}

/// Resolve error names that mean the claim is gone for good
const UNRESOLVABLE_ERRORS: &[&str] = &["NOT_FOUND", "BLOCKED", "INVALID_URL"];

/// [`ContentDaemon`] backed by the daemon's JSON-RPC API
#[derive(Debug, Clone)]
pub struct LbrynetClient {
    client: Client,
    endpoint: String,
}

impl LbrynetClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.rpc_timeout()).build()?;
        Ok(Self::new(client, config.endpoint.clone()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends one RPC call and returns its `result`
    async fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        tracing::debug!("lbrynet {} {}", method, params);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "method": method, "params": params }))
            .send()
            .await
            .map_err(|e| self.map_transport(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DaemonError::Rpc {
                method: method.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let body: RpcResponse = response.json().await.map_err(|e| DaemonError::Protocol {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(error) = body.error {
            return Err(DaemonError::Rpc {
                method: method.to_string(),
                message: error.message,
            });
        }

        body.result.ok_or_else(|| DaemonError::Protocol {
            method: method.to_string(),
            reason: "missing result".to_string(),
        })
    }

    fn map_transport(&self, method: &str, err: reqwest::Error) -> DaemonError {
        if err.is_connect() {
            DaemonError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        } else if err.is_timeout() {
            DaemonError::Timeout {
                method: method.to_string(),
            }
        } else {
            DaemonError::Rpc {
                method: method.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn protocol(method: &str, reason: impl Into<String>) -> DaemonError {
    DaemonError::Protocol {
        method: method.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl ContentDaemon for LbrynetClient {
    async fn status(&self) -> Result<DaemonStatus, DaemonError> {
        let result = self.call("status", json!({})).await?;
        let is_running = result
            .get("is_running")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(DaemonStatus { is_running })
    }

    async fn resolve(&self, uri: &str) -> Result<ResolvedClaim, DaemonError> {
        let result = self.call("resolve", json!({ "urls": [uri] })).await?;
        let claim = result
            .get(uri)
            .ok_or_else(|| protocol("resolve", format!("no entry for {}", uri)))?;

        if let Some(error) = claim.get("error") {
            let name = error.get("name").and_then(Value::as_str).unwrap_or("");
            let text = error
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());

            return Err(if UNRESOLVABLE_ERRORS.contains(&name) {
                DaemonError::NotFound {
                    uri: uri.to_string(),
                    reason: text,
                }
            } else {
                DaemonError::Rpc {
                    method: "resolve".to_string(),
                    message: text,
                }
            });
        }

        let field = |key: &str| {
            claim
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| protocol("resolve", format!("claim has no {}", key)))
        };

        Ok(ResolvedClaim {
            permanent_url: field("permanent_url")?,
            claim_id: field("claim_id")?,
            name: field("name")?,
        })
    }

    async fn start_download(&self, uri: &str, dir: &Path) -> Result<DownloadState, DaemonError> {
        let result = self
            .call(
                "get",
                json!({
                    "uri": uri,
                    "save_file": true,
                    "download_directory": dir.to_string_lossy(),
                }),
            )
            .await?;

        if let Some(error) = result.get("error") {
            return Err(DaemonError::Rejected {
                uri: uri.to_string(),
                reason: error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        let item: FileItem =
            serde_json::from_value(result).map_err(|e| protocol("get", e.to_string()))?;
        Ok(item.state())
    }

    async fn download_status(&self, claim_id: &str) -> Result<DownloadState, DaemonError> {
        let result = self
            .call("file_list", json!({ "claim_id": claim_id }))
            .await?;
        let page: FileListPage =
            serde_json::from_value(result).map_err(|e| protocol("file_list", e.to_string()))?;

        Ok(page
            .items
            .first()
            .map(FileItem::state)
            .unwrap_or(DownloadState::Missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> LbrynetClient {
        LbrynetClient::new(Client::new(), server.uri())
    }

    async fn mount(server: &MockServer, rpc: &str, body: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_status() {
        let server = MockServer::start().await;
        mount(&server, "status", json!({ "result": { "is_running": true } })).await;

        let status = client_for(&server).await.status().await.unwrap();
        assert!(status.is_running);
    }

    #[tokio::test]
    async fn test_resolve_returns_permanent_url() {
        let server = MockServer::start().await;
        mount(
            &server,
            "resolve",
            json!({ "result": { "lbry://@chan#1/video#2": {
                "claim_id": "2abc",
                "name": "video",
                "permanent_url": "lbry://video#2abc"
            }}}),
        )
        .await;

        let claim = client_for(&server)
            .await
            .resolve("lbry://@chan#1/video#2")
            .await
            .unwrap();
        assert_eq!(claim.permanent_url, "lbry://video#2abc");
        assert_eq!(claim.claim_id, "2abc");
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let server = MockServer::start().await;
        mount(
            &server,
            "resolve",
            json!({ "result": { "lbry://gone": {
                "error": { "name": "NOT_FOUND", "text": "Could not find claim at \"lbry://gone\"." }
            }}}),
        )
        .await;

        let err = client_for(&server)
            .await
            .resolve("lbry://gone")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rpc_error_is_retryable() {
        use crate::retry::IsRetryable;

        let server = MockServer::start().await;
        mount(
            &server,
            "resolve",
            json!({ "error": { "code": -32500, "message": "wallet not ready" } }),
        )
        .await;

        let err = client_for(&server)
            .await
            .resolve("lbry://x")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Rpc { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_start_download_sends_directory() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "get",
                "params": { "uri": "lbry://video#2", "save_file": true, "download_directory": "/tmp/out" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "status": "running", "completed": false, "written_bytes": 50, "total_bytes": 100 }
            })))
            .mount(&server)
            .await;

        let state = client_for(&server)
            .await
            .start_download("lbry://video#2", Path::new("/tmp/out"))
            .await
            .unwrap();
        assert_eq!(state, DownloadState::Running { progress: Some(0.5) });
    }

    #[tokio::test]
    async fn test_start_download_rejected() {
        let server = MockServer::start().await;
        mount(
            &server,
            "get",
            json!({ "result": { "error": "Not enough funds to cover this transaction." } }),
        )
        .await;

        let err = client_for(&server)
            .await
            .start_download("lbry://paid#1", Path::new("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_download_status_completed_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": { "claim_id": "done" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "items": [{ "completed": true, "status": "finished", "download_path": "/tmp/out/v.mp4" }] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": { "claim_id": "unknown" } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "items": [] } })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(
            client.download_status("done").await.unwrap(),
            DownloadState::Completed {
                path: Some("/tmp/out/v.mp4".to_string())
            }
        );
        assert_eq!(
            client.download_status("unknown").await.unwrap(),
            DownloadState::Missing
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Nothing listens on a port once its listener is dropped
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = LbrynetClient::new(Client::new(), endpoint);
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, DaemonError::Unreachable { .. }));
    }
}
