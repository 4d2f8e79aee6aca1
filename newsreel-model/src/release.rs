use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::ids::{ImdbId, ReleaseId};

/// Health verdict for a release, produced by the health sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            other => Err(ModelError::InvalidState(format!(
                "unknown health status: {other}"
            ))),
        }
    }
}

/// Identification state of a release.
///
/// Carried explicitly on the record instead of sentinel id strings:
/// `Unresolved` means the indexer did not supply a usable content id,
/// `NoMatch` means a title search definitively failed and the release
/// must never be retried, `Resolved` carries the external content id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKey {
    Unresolved,
    NoMatch,
    Resolved(ImdbId),
}

impl ContentKey {
    /// Database/textual encoding. `Resolved` stores the bare IMDb id so
    /// the secondary index on this column doubles as the by-content-id
    /// lookup.
    pub fn encode(&self) -> &str {
        match self {
            ContentKey::Unresolved => "unresolved",
            ContentKey::NoMatch => "no-match",
            ContentKey::Resolved(id) => id.as_str(),
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        match raw {
            "unresolved" => Ok(ContentKey::Unresolved),
            "no-match" => Ok(ContentKey::NoMatch),
            other => Ok(ContentKey::Resolved(ImdbId::parse(other)?)),
        }
    }

    pub fn resolved(&self) -> Option<&ImdbId> {
        match self {
            ContentKey::Resolved(id) => Some(id),
            _ => None,
        }
    }
}

/// One discrete published unit from the indexer: a single candidate
/// file set for a piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRecord {
    pub release_id: ReleaseId,
    pub title: String,
    pub size_bytes: i64,
    pub published_at: DateTime<Utc>,
    pub content_key: ContentKey,
    pub content_title: Option<String>,
    pub health_status: HealthStatus,
    pub health_checked_at: DateTime<Utc>,
    pub health_success: i64,
    pub health_failure: i64,
}

impl ReleaseRecord {
    /// A freshly ingested release: identification as reported by the
    /// indexer, health unknown, health clock seeded with the publish
    /// time so the sampler visits oldest releases first.
    pub fn ingested(
        release_id: ReleaseId,
        title: String,
        size_bytes: i64,
        published_at: DateTime<Utc>,
        content_key: ContentKey,
        content_title: Option<String>,
    ) -> Self {
        ReleaseRecord {
            release_id,
            title,
            size_bytes,
            published_at,
            content_key,
            content_title,
            health_status: HealthStatus::Unknown,
            health_checked_at: published_at,
            health_success: 0,
            health_failure: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_round_trips_through_encoding() {
        for key in [
            ContentKey::Unresolved,
            ContentKey::NoMatch,
            ContentKey::Resolved(ImdbId::parse("tt0111161").unwrap()),
        ] {
            assert_eq!(ContentKey::decode(key.encode()).unwrap(), key);
        }
    }

    #[test]
    fn content_key_rejects_malformed_ids() {
        assert!(ContentKey::decode("tt_not_numeric").is_err());
    }

    #[test]
    fn health_status_parses_known_values() {
        assert_eq!(HealthStatus::parse("healthy").unwrap(), HealthStatus::Healthy);
        assert!(HealthStatus::parse("fine").is_err());
    }
}
