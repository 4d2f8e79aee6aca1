//! TMDB-backed metadata provider.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use newsreel_model::{ContentKind, ImdbId};

use super::{parse_runtime_minutes, ContentMetadata, MetadataProvider, ProviderError, TitleMatch};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone)]
pub struct TmdbProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<IdOnly>,
    #[serde(default)]
    tv_results: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

/// Runtime arrives as integer minutes from TMDB proper, but some
/// mirrored payloads carry an ISO-8601-like duration string instead.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeField {
    Minutes(i64),
    Text(String),
}

impl RuntimeField {
    fn minutes(&self) -> Option<i64> {
        match self {
            RuntimeField::Minutes(m) => Some(*m),
            RuntimeField::Text(raw) => parse_runtime_minutes(raw),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    imdb_id: Option<String>,
    title: String,
    original_title: Option<String>,
    original_language: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<i64>,
    popularity: Option<f64>,
    runtime: Option<RuntimeField>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    name: String,
    original_name: Option<String>,
    original_language: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<i64>,
    popularity: Option<f64>,
    #[serde(default)]
    episode_run_time: Vec<i64>,
    first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<IdOnly>,
}

impl TmdbProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut query = vec![("api_key", self.api_key.as_str()), ("language", "en-US")];
        query.extend_from_slice(extra);
        let response = self.client.get(&url).query(&query).send().await?;
        match response.status() {
            status if status.is_success() => {}
            reqwest::StatusCode::NOT_FOUND => return Err(ProviderError::NotFound),
            reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            status => return Err(ProviderError::Api(format!("{path}: HTTP {status}"))),
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Parse(format!("{path}: {e}")))
    }

    async fn movie_metadata(&self, tmdb_id: u64) -> Result<ContentMetadata, ProviderError> {
        let details: MovieDetails = self.get_json(&format!("/movie/{tmdb_id}"), &[]).await?;
        let imdb_id = details
            .imdb_id
            .as_deref()
            .ok_or_else(|| ProviderError::Parse(format!("movie {tmdb_id} has no imdb id")))
            .and_then(|raw| {
                ImdbId::parse(raw).map_err(|e| ProviderError::Parse(e.to_string()))
            })?;
        Ok(ContentMetadata {
            imdb_id,
            kind: ContentKind::Movie,
            title: details.title,
            original_title: details.original_title,
            original_language: details.original_language,
            overview: details.overview,
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            poster_path: details.poster_path,
            backdrop_path: details.backdrop_path,
            vote_average: details.vote_average,
            vote_count: details.vote_count,
            popularity: details.popularity,
            runtime_minutes: details.runtime.as_ref().and_then(RuntimeField::minutes),
            release_date: parse_date(details.release_date.as_deref()),
        })
    }

    async fn tv_metadata(
        &self,
        tmdb_id: u64,
        imdb_id: ImdbId,
    ) -> Result<ContentMetadata, ProviderError> {
        let details: TvDetails = self.get_json(&format!("/tv/{tmdb_id}"), &[]).await?;
        Ok(ContentMetadata {
            imdb_id,
            kind: ContentKind::Tv,
            title: details.name,
            original_title: details.original_name,
            original_language: details.original_language,
            overview: details.overview,
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            poster_path: details.poster_path,
            backdrop_path: details.backdrop_path,
            vote_average: details.vote_average,
            vote_count: details.vote_count,
            popularity: details.popularity,
            runtime_minutes: details.episode_run_time.first().copied(),
            release_date: parse_date(details.first_air_date.as_deref()),
        })
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    async fn identify_title(&self, title: &str) -> Result<Option<TitleMatch>, ProviderError> {
        let term = search_term(title);
        if term.is_empty() {
            return Ok(None);
        }
        let search: SearchResponse = self
            .get_json("/search/movie", &[("query", term.as_str())])
            .await?;
        let Some(first) = search.results.first() else {
            return Ok(None);
        };
        // The search result carries no IMDb id; the detail lookup does.
        let details: MovieDetails = self.get_json(&format!("/movie/{}", first.id), &[]).await?;
        let Some(raw_imdb) = details.imdb_id.as_deref().filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let imdb_id =
            ImdbId::parse(raw_imdb).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(Some(TitleMatch {
            imdb_id,
            title: details.title,
        }))
    }

    async fn fetch_content(&self, imdb_id: &ImdbId) -> Result<ContentMetadata, ProviderError> {
        let found: FindResponse = self
            .get_json(
                &format!("/find/{}", imdb_id.as_str()),
                &[("external_source", "imdb_id")],
            )
            .await?;
        if let Some(movie) = found.movie_results.first() {
            return self.movie_metadata(movie.id).await;
        }
        if let Some(tv) = found.tv_results.first() {
            return self.tv_metadata(tv.id, imdb_id.clone()).await;
        }
        Err(ProviderError::NotFound)
    }
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?, "%Y-%m-%d").ok()
}

/// Scene release names encode the searchable title before the year or
/// the first quality token: strip separators and cut there.
static CUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b((19|20)\d{2}|2160p|1080p|720p|480p|blu-?ray|web-?(dl|rip)|hdtv|dvdrip|brrip|remux|x26[45]|h26[45]|hevc|proper|repack|internal)\b",
    )
    .unwrap()
});

fn search_term(release_name: &str) -> String {
    let spaced = release_name.replace(['.', '_'], " ");
    let cut = match CUT_RE.find(&spaced) {
        // Year-titled movies ("1917", "2012") match at the very start;
        // keep that token and cut at the next marker instead.
        Some(m) if m.start() == 0 => match CUT_RE.find_at(&spaced, m.end()) {
            Some(next) => &spaced[..next.start()],
            None => spaced.as_str(),
        },
        Some(m) => &spaced[..m.start()],
        None => spaced.as_str(),
    };
    cut.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_term_cuts_at_year() {
        assert_eq!(
            search_term("The.Matrix.1999.1080p.BluRay.x264-GROUP"),
            "The Matrix"
        );
    }

    #[test]
    fn search_term_cuts_at_quality_token_without_year() {
        assert_eq!(search_term("Some_Film_720p_WEB-DL"), "Some Film");
    }

    #[test]
    fn search_term_passes_plain_titles_through() {
        assert_eq!(search_term("Plain Title"), "Plain Title");
    }

    #[test]
    fn search_term_keeps_year_like_titles() {
        assert_eq!(search_term("1917.2019.1080p.BluRay.x264-GROUP"), "1917");
        assert_eq!(search_term("2012.2009.720p.WEB-DL"), "2012");
        // A lone year-like name is the whole term, never empty.
        assert_eq!(search_term("1917"), "1917");
    }

    #[test]
    fn runtime_field_normalizes_both_shapes() {
        let minutes: RuntimeField = serde_json::from_str("136").unwrap();
        assert_eq!(minutes.minutes(), Some(136));
        let text: RuntimeField = serde_json::from_str("\"PT2H16M\"").unwrap();
        assert_eq!(text.minutes(), Some(136));
    }

    #[test]
    fn movie_details_decodes_partial_payloads() {
        let details: MovieDetails = serde_json::from_str(
            r#"{"imdb_id": "tt0133093", "title": "The Matrix", "runtime": 136}"#,
        )
        .unwrap();
        assert_eq!(details.imdb_id.as_deref(), Some("tt0133093"));
        assert!(details.genres.is_empty());
    }
}
