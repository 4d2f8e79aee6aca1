//! External metadata providers.
//!
//! The pipeline only needs two operations from a provider: resolve a
//! release title to an external content id, and fetch rich metadata for
//! a known content id. TMDB backs both in production.

pub mod tmdb;

pub use tmdb::TmdbProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use newsreel_model::{BestRelease, ContentInfo, ContentKind, ImdbId};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {0}")]
    Api(String),

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Outcome of a title search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleMatch {
    pub imdb_id: ImdbId,
    pub title: String,
}

/// Rich metadata for a content id, before the best-release pointer is
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMetadata {
    pub imdb_id: ImdbId,
    pub kind: ContentKind,
    pub title: String,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub overview: Option<String>,
    pub genres: Vec<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    pub popularity: Option<f64>,
    pub runtime_minutes: Option<i64>,
    pub release_date: Option<NaiveDate>,
}

impl ContentMetadata {
    pub fn into_info(self, best_release: BestRelease) -> ContentInfo {
        ContentInfo {
            imdb_id: self.imdb_id,
            kind: self.kind,
            title: self.title,
            original_title: self.original_title,
            original_language: self.original_language,
            overview: self.overview,
            genres: self.genres,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            vote_average: self.vote_average,
            vote_count: self.vote_count,
            popularity: self.popularity,
            runtime_minutes: self.runtime_minutes,
            release_date: self.release_date,
            best_release,
        }
    }
}

/// Seam the identification and backfill workers talk through.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Resolve a raw release name to a content id. `Ok(None)` is a
    /// definitive miss, recorded as a permanent no-match.
    async fn identify_title(&self, title: &str) -> Result<Option<TitleMatch>, ProviderError>;

    /// Fetch metadata for a known content id.
    async fn fetch_content(&self, imdb_id: &ImdbId) -> Result<ContentMetadata, ProviderError>;
}

/// Providers report runtime either as plain minutes or as an
/// ISO-8601-like duration string (`PT1H52M`). Normalize to minutes.
pub fn parse_runtime_minutes(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(minutes) = raw.parse::<i64>() {
        return Some(minutes);
    }
    let rest = raw.strip_prefix("PT")?;
    let mut minutes = 0i64;
    let mut digits = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: i64 = digits.parse().ok()?;
        digits.clear();
        match ch {
            'H' => minutes += value * 60,
            'M' => minutes += value,
            'S' => {}
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_accepts_plain_minutes() {
        assert_eq!(parse_runtime_minutes("115"), Some(115));
    }

    #[test]
    fn runtime_accepts_iso_durations() {
        assert_eq!(parse_runtime_minutes("PT1H52M"), Some(112));
        assert_eq!(parse_runtime_minutes("PT2H"), Some(120));
        assert_eq!(parse_runtime_minutes("PT47M"), Some(47));
    }

    #[test]
    fn runtime_rejects_garbage() {
        assert_eq!(parse_runtime_minutes("two hours"), None);
        assert_eq!(parse_runtime_minutes("PT1X"), None);
        assert_eq!(parse_runtime_minutes("PT90"), None);
    }
}
