//! JSON-RPC client for the local NZBGet instance.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use newsreel_model::{DownloadStatus, ReleaseId};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("append rejected for {0}")]
    AppendRejected(ReleaseId),

    #[error("no status for queue entry {0}")]
    StatusMissing(i64),

    #[error("conflicting statuses for queue entry {0}")]
    StatusAmbiguous(i64),
}

#[derive(Debug, Clone)]
pub struct NzbgetConfig {
    pub dest_dir: String,
}

/// Download tool server status, reported back to the store each poll.
#[derive(Debug, Clone, Copy)]
pub struct ServerStatus {
    pub download_rate: i64,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: Option<String>,
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ConfigEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct QueueEntry {
    #[serde(rename = "NZBID")]
    nzb_id: i64,
    #[serde(rename = "FileSizeMB")]
    file_size_mb: f64,
    #[serde(rename = "DownloadedSizeMB")]
    downloaded_size_mb: f64,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "DestDir", default)]
    dest_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(rename = "DownloadRate")]
    download_rate: i64,
}

#[derive(Debug, Clone)]
pub struct NzbgetClient {
    client: reqwest::Client,
    url: String,
}

impl NzbgetClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .send()
            .await?;
        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc(format!(
                "{method}: {} (code {})",
                error.message.unwrap_or_else(|| "unknown".to_string()),
                error.code.unwrap_or(0)
            )));
        }
        envelope
            .result
            .ok_or_else(|| RpcError::Decode(format!("{method}: neither result nor error")))
    }

    fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
        serde_json::from_value(value).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }

    pub async fn config(&self) -> Result<NzbgetConfig, RpcError> {
        let result = self.rpc("config", json!([])).await?;
        let entries: Vec<ConfigEntry> = Self::decode("config", result)?;
        let dest_dir = entries
            .into_iter()
            .find(|e| e.name == "DestDir")
            .map(|e| e.value)
            .ok_or_else(|| RpcError::Decode("config: no DestDir entry".to_string()))?;
        Ok(NzbgetConfig { dest_dir })
    }

    /// Start a download from a remote NZB URL. Returns the queue number.
    /// The release id doubles as the dupe key, which is what makes a
    /// duplicate start attempt after a daemon restart harmless.
    pub async fn append(
        &self,
        release_id: &ReleaseId,
        content_url: &str,
    ) -> Result<i64, RpcError> {
        let result = self
            .rpc(
                "append",
                json!([
                    "",               // NZBFilename
                    content_url,      // Content
                    "",               // Category
                    0,                // Priority
                    false,            // AddToTop
                    false,            // AddPaused
                    release_id.as_str(), // DupeKey
                    0,                // DupeScore
                    "SCORE",          // DupeMode
                ]),
            )
            .await?;
        let queue_number: i64 = Self::decode("append", result)?;
        if queue_number <= 0 {
            return Err(RpcError::AppendRejected(release_id.clone()));
        }
        Ok(queue_number)
    }

    /// Poll the state of one queue entry, looking at the live queue and
    /// the history: exactly one of them must know the entry.
    pub async fn download_status(&self, queue_number: i64) -> Result<DownloadStatus, RpcError> {
        let groups = self.rpc("listgroups", json!([0])).await?;
        let history = self.rpc("history", json!([false])).await?;
        let in_queue: Vec<QueueEntry> = Self::decode("listgroups", groups)?;
        let completed: Vec<QueueEntry> = Self::decode("history", history)?;

        let mut matches: Vec<DownloadStatus> = Vec::new();
        for (entries, in_queue) in [(in_queue, true), (completed, false)] {
            for entry in entries {
                if entry.nzb_id == queue_number {
                    matches.push(DownloadStatus {
                        file_size_mb: entry.file_size_mb,
                        downloaded_size_mb: entry.downloaded_size_mb,
                        status: entry.status,
                        path: entry.dest_dir.unwrap_or_default(),
                        in_queue,
                    });
                }
            }
        }
        match matches.len() {
            0 => Err(RpcError::StatusMissing(queue_number)),
            1 => Ok(matches.remove(0)),
            _ => Err(RpcError::StatusAmbiguous(queue_number)),
        }
    }

    pub async fn server_status(&self) -> Result<ServerStatus, RpcError> {
        let result = self.rpc("status", json!([])).await?;
        let body: StatusBody = Self::decode("status", result)?;
        Ok(ServerStatus {
            download_rate: body.download_rate,
        })
    }

    /// Remove a completed entry from the download tool's history.
    pub async fn delete_history_entry(&self, queue_number: i64) -> Result<(), RpcError> {
        self.rpc(
            "editqueue",
            json!(["HistoryFinalDelete", "", [queue_number]]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_entry_decodes_nzbget_shape() {
        let entry: QueueEntry = serde_json::from_str(
            r#"{"NZBID": 42, "FileSizeMB": 7000.0, "DownloadedSizeMB": 123.5,
                "Status": "DOWNLOADING", "DestDir": "/downloads/movie"}"#,
        )
        .unwrap();
        assert_eq!(entry.nzb_id, 42);
        assert_eq!(entry.status, "DOWNLOADING");
    }

    #[test]
    fn rpc_envelope_surfaces_errors() {
        let envelope: RpcEnvelope = serde_json::from_str(
            r#"{"result": null, "error": {"message": "bad params", "code": -32602}}"#,
        )
        .unwrap();
        assert!(envelope.error.is_some());
    }
}
