//! Panel HTTP client
//!
//! Speaks the panel's client API for a single managed server. One instance
//! per host; credentials come from the injected configuration, never from
//! the environment.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::HostConfig;

use super::error::PanelError;
use super::files::FileOpsApi;
use super::power::ProcessApi;
use super::types::{PowerAction, PowerState, RemoteArchive, RemoteEntry};

/// Per-operation client-side timeouts.
///
/// Compress and decompress run server-side on a potentially huge world, so
/// they get operation-specific budgets; everything else shares the default.
#[derive(Debug, Clone)]
pub struct RequestTimeouts {
    pub default: Duration,
    pub compress: Duration,
    pub decompress: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            compress: Duration::from_secs(15 * 60),
            decompress: Duration::from_secs(5 * 60),
        }
    }
}

pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    server_id: String,
    timeouts: RequestTimeouts,
}

// ── Wire format ──

#[derive(Deserialize)]
struct Wrapped<T> {
    attributes: T,
}

#[derive(Deserialize)]
struct ListResponse {
    data: Vec<Wrapped<FileAttributes>>,
}

#[derive(Deserialize)]
struct FileAttributes {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default = "default_true")]
    is_file: bool,
    #[serde(default)]
    mimetype: String,
    #[serde(default)]
    modified_at: String,
}

#[derive(Deserialize)]
struct ResourceAttributes {
    current_state: String,
}

fn default_true() -> bool {
    true
}

impl From<FileAttributes> for RemoteEntry {
    fn from(attrs: FileAttributes) -> Self {
        RemoteEntry {
            name: attrs.name,
            size: attrs.size,
            is_file: attrs.is_file,
            mime_type: attrs.mimetype,
            modified_at: attrs.modified_at,
        }
    }
}

impl PanelClient {
    pub fn new(host: &HostConfig) -> Self {
        Self::with_timeouts(host, RequestTimeouts::default())
    }

    pub fn with_timeouts(host: &HostConfig, timeouts: RequestTimeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: host.panel_url.trim_end_matches('/').to_string(),
            api_key: host.api_key.clone(),
            server_id: host.server_id.clone(),
            timeouts,
        }
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/api/client/servers/{}/{}",
            self.base_url, self.server_id, tail
        )
    }

    async fn post(
        &self,
        tail: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, PanelError> {
        let response = self
            .http
            .post(self.url(tail))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .timeout(timeout)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn get(&self, tail: &str) -> Result<reqwest::Response, PanelError> {
        let response = self
            .http
            .get(self.url(tail))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .timeout(self.timeouts.default)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PanelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PanelError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ProcessApi for PanelClient {
    async fn send_power(&self, action: PowerAction) -> Result<(), PanelError> {
        debug!(server = %self.server_id, signal = action.signal(), "sending power signal");
        self.post(
            "power",
            json!({ "signal": action.signal() }),
            self.timeouts.default,
        )
        .await?;
        Ok(())
    }

    async fn query_state(&self) -> Result<PowerState, PanelError> {
        let response = self.get("resources").await?;
        let body: Wrapped<ResourceAttributes> = response
            .json()
            .await
            .map_err(|e| PanelError::BadResponse(e.to_string()))?;
        parse_state(&body.attributes.current_state)
    }

    async fn send_command(&self, command: &str) -> Result<(), PanelError> {
        self.post(
            "command",
            json!({ "command": command }),
            self.timeouts.default,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FileOpsApi for PanelClient {
    async fn compress(&self, root: &str, paths: &[String]) -> Result<RemoteArchive, PanelError> {
        debug!(server = %self.server_id, root, ?paths, "requesting compression");
        let response = self
            .post(
                "files/compress",
                json!({ "root": root, "files": paths }),
                self.timeouts.compress,
            )
            .await?;
        let body: Wrapped<FileAttributes> = response
            .json()
            .await
            .map_err(|e| PanelError::BadResponse(e.to_string()))?;
        Ok(RemoteArchive {
            name: body.attributes.name,
            size: body.attributes.size,
        })
    }

    async fn decompress(&self, root: &str, file: &str) -> Result<(), PanelError> {
        debug!(server = %self.server_id, root, file, "requesting extraction");
        // No structured completion payload comes back from this endpoint;
        // a 2xx is the only confirmation the panel ever gives.
        self.post(
            "files/decompress",
            json!({ "root": root, "file": file }),
            self.timeouts.decompress,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, root: &str, paths: &[String]) -> Result<(), PanelError> {
        debug!(server = %self.server_id, root, ?paths, "deleting remote paths");
        self.post(
            "files/delete",
            json!({ "root": root, "files": paths }),
            self.timeouts.default,
        )
        .await?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, PanelError> {
        let encoded: String = dir.bytes().flat_map(percent_encode_byte).collect();
        let response = self.get(&format!("files/list?directory={encoded}")).await?;
        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| PanelError::BadResponse(e.to_string()))?;
        Ok(body.data.into_iter().map(|w| w.attributes.into()).collect())
    }
}

fn parse_state(raw: &str) -> Result<PowerState, PanelError> {
    match raw {
        "offline" => Ok(PowerState::Offline),
        "starting" => Ok(PowerState::Starting),
        "running" => Ok(PowerState::Running),
        "stopping" => Ok(PowerState::Stopping),
        "crashed" => Ok(PowerState::Crashed),
        other => Err(PanelError::BadResponse(format!(
            "unknown power state: {other}"
        ))),
    }
}

/// Minimal percent-encoding for the directory query parameter.
fn percent_encode_byte(b: u8) -> Vec<char> {
    match b {
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
            vec![b as char]
        }
        _ => format!("%{:02X}", b).chars().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_states() {
        assert_eq!(parse_state("offline").unwrap(), PowerState::Offline);
        assert_eq!(parse_state("running").unwrap(), PowerState::Running);
        assert!(parse_state("hibernating").is_err());
    }

    #[test]
    fn encodes_directory_query() {
        let encoded: String = "/world data".bytes().flat_map(percent_encode_byte).collect();
        assert_eq!(encoded, "%2Fworld%20data");
    }

    #[test]
    fn list_response_deserializes() {
        let raw = r#"{
            "object": "list",
            "data": [
                {"object": "file_object", "attributes": {
                    "name": "world", "size": 0, "is_file": false,
                    "mimetype": "inode/directory",
                    "modified_at": "2025-11-02T10:00:00+00:00"
                }},
                {"object": "file_object", "attributes": {
                    "name": "archive-2025-11-02.tar.gz", "size": 104857600,
                    "is_file": true, "mimetype": "application/gzip",
                    "modified_at": "2025-11-02T10:05:00+00:00"
                }}
            ]
        }"#;
        let parsed: ListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert!(!parsed.data[0].attributes.is_file);
        assert_eq!(parsed.data[1].attributes.size, 104857600);
    }
}
