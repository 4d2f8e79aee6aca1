use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{ModelError, Result};
use crate::ids::{AccountId, ImdbId, ReleaseId};

/// An account's desired disposition for a specific release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    ForceDownload,
    Download,
    Delete,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::ForceDownload => "force-download",
            TargetState::Download => "download",
            TargetState::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "force-download" => Ok(TargetState::ForceDownload),
            "download" => Ok(TargetState::Download),
            "delete" => Ok(TargetState::Delete),
            other => Err(ModelError::InvalidState(format!(
                "unknown target state: {other}"
            ))),
        }
    }

    /// States that mean "the account wants this release on disk".
    pub fn wants_download(&self) -> bool {
        matches!(self, TargetState::Download | TargetState::ForceDownload)
    }
}

/// Live progress of a download as reported by the download tool.
/// Written exclusively by the acquisition daemon.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DownloadStatus {
    pub file_size_mb: f64,
    pub downloaded_size_mb: f64,
    pub status: String,
    pub path: String,
    pub in_queue: bool,
}

/// One row per (account, release) pair ever offered to that account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTarget {
    pub account_id: AccountId,
    pub release_id: ReleaseId,
    pub content_id: ImdbId,
    pub release_title: String,
    pub release_size: i64,
    pub published_at: DateTime<Utc>,
    pub target_state: TargetState,
    pub download_status: Option<DownloadStatus>,
}

/// A subscribed account. Releases published before `min_release_date`
/// are never offered to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: AccountId,
    pub min_release_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_state_round_trips() {
        for state in [
            TargetState::ForceDownload,
            TargetState::Download,
            TargetState::Delete,
        ] {
            assert_eq!(TargetState::parse(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn wants_download_excludes_delete() {
        assert!(TargetState::Download.wants_download());
        assert!(TargetState::ForceDownload.wants_download());
        assert!(!TargetState::Delete.wants_download());
    }
}
