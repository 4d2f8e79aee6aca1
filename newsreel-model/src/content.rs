use chrono::{DateTime, NaiveDate, Utc};

use crate::ids::{ImdbId, ReleaseId};

/// Whether a content id resolved to a movie or a TV show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Tv,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Movie => "movie",
            ContentKind::Tv => "tv",
        }
    }
}

/// Pointer to the largest-by-size release currently known for a
/// content id. `size_bytes` is monotonically non-decreasing for a given
/// content id; the identification worker only moves the pointer on a
/// strictly larger release.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BestRelease {
    pub release_id: ReleaseId,
    pub title: String,
    pub size_bytes: i64,
    pub published_at: DateTime<Utc>,
}

/// Cached metadata for one content id, enriched with the best-release
/// pointer. Created on first successful identification.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentInfo {
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
    pub best_release: BestRelease,
}

impl ContentInfo {
    /// True when `candidate_size` should take over the best-release
    /// pointer. Equal sizes lose: the first observed release wins ties.
    pub fn improves_on_best(&self, candidate_size: i64) -> bool {
        candidate_size > self.best_release.size_bytes
    }
}
