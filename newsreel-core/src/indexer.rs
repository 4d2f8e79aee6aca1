//! Client for the newznab-style binary indexer.
//!
//! Two endpoints matter: the paged movie search feed (JSON) that the
//! ingester and backfill walk, and the `t=get` NZB manifest download
//! the health sampler pulls segment message-ids from.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use newsreel_model::{ContentKey, ImdbId, ReleaseId, ReleaseRecord};

/// Marker the indexer embeds in an HTTP 200 body when the API key has
/// exhausted its daily quota.
const RATE_LIMIT_MARKER: &str = "Request limit reached";

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    #[error("decode error: {0}")]
    Decode(String),
}

/// One page of feed results. `RateLimited` is a soft failure: callers
/// abort the invocation without raising an error.
#[derive(Debug)]
pub enum FeedPage {
    Items(Vec<ReleaseRecord>),
    RateLimited,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    channel: FeedChannel,
}

#[derive(Debug, Deserialize)]
struct FeedChannel {
    #[serde(default)]
    item: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    title: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
    #[serde(default)]
    attr: Vec<FeedAttr>,
}

#[derive(Debug, Deserialize)]
struct FeedAttr {
    #[serde(rename = "@attributes")]
    attributes: FeedAttrInner,
}

#[derive(Debug, Deserialize)]
struct FeedAttrInner {
    name: String,
    value: String,
}

impl FeedItem {
    fn into_record(self) -> Result<ReleaseRecord, IndexerError> {
        let mut guid = None;
        let mut size = None;
        let mut imdb = None;
        let mut imdb_title = None;
        for attr in self.attr {
            let FeedAttrInner { name, value } = attr.attributes;
            match name.as_str() {
                "guid" => guid = Some(value),
                "size" => size = Some(value),
                "imdb" => imdb = Some(value),
                "imdbtitle" => imdb_title = Some(value),
                _ => {}
            }
        }
        let guid = guid.ok_or_else(|| {
            IndexerError::Decode(format!("feed item without guid attr: {}", self.title))
        })?;
        let size: i64 = size
            .ok_or_else(|| IndexerError::Decode(format!("feed item without size attr: {guid}")))?
            .parse()
            .map_err(|e| IndexerError::Decode(format!("bad size attr for {guid}: {e}")))?;
        let published_at: DateTime<Utc> = DateTime::parse_from_rfc2822(&self.pub_date)
            .map_err(|e| IndexerError::Decode(format!("bad pubDate for {guid}: {e}")))?
            .with_timezone(&Utc);

        // The feed reports "0000000" (or nothing) when it has no IMDb
        // match for the release.
        let content_key = match imdb.as_deref() {
            None | Some("0000000") | Some("") => ContentKey::Unresolved,
            Some(digits) => ContentKey::Resolved(
                ImdbId::parse(format!("tt{digits}"))
                    .map_err(|e| IndexerError::Decode(format!("bad imdb attr for {guid}: {e}")))?,
            ),
        };

        Ok(ReleaseRecord::ingested(
            ReleaseId::new(guid),
            self.title,
            size,
            published_at,
            content_key,
            imdb_title.filter(|t| !t.is_empty()),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct IndexerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetch one page of the movie feed, most recent first.
    pub async fn movie_page(&self, offset: usize) -> Result<FeedPage, IndexerError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("t", "movie"),
                ("cat", "2045"),
                ("o", "json"),
                ("attrs", "guid,imdb,imdbtitle"),
                ("offset", &offset.to_string()),
                ("apikey", &self.api_key),
            ])
            .header("User-Agent", "newsreel")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IndexerError::Status(response.status()));
        }
        let body = response.text().await?;
        if body.contains(RATE_LIMIT_MARKER) {
            return Ok(FeedPage::RateLimited);
        }
        let feed: FeedResponse = serde_json::from_str(&body)
            .map_err(|e| IndexerError::Decode(format!("feed response: {e}")))?;
        let items = feed
            .channel
            .item
            .into_iter()
            .map(FeedItem::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeedPage::Items(items))
    }

    /// URL the download tool can fetch the NZB manifest from directly.
    pub fn manifest_url(&self, release_id: &ReleaseId) -> String {
        format!(
            "{}?t=get&id={}&apikey={}",
            self.base_url,
            release_id.as_str(),
            self.api_key
        )
    }

    /// Download the NZB manifest for a release and return its segment
    /// message-ids.
    pub async fn manifest_segments(
        &self,
        release_id: &ReleaseId,
    ) -> Result<Vec<String>, IndexerError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("t", "get"),
                ("id", release_id.as_str()),
                ("apikey", &self.api_key),
            ])
            .header("User-Agent", "newsreel")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IndexerError::Status(response.status()));
        }
        let body = response.text().await?;
        let segments = extract_segments(&body);
        if segments.is_empty() {
            return Err(IndexerError::Decode(format!(
                "manifest for {release_id} contains no segments"
            )));
        }
        Ok(segments)
    }
}

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<segment[^>]*>([^<]+)</segment>").unwrap());

/// Pull the segment message-ids out of an NZB manifest.
pub fn extract_segments(manifest: &str) -> Vec<String> {
    SEGMENT_RE
        .captures_iter(manifest)
        .map(|cap| cap[1].trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsreel_model::HealthStatus;

    #[test]
    fn extracts_segments_from_multi_file_manifest() {
        let manifest = r#"<?xml version="1.0" encoding="utf-8"?>
        <nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
          <file poster="a@b" date="1638000000" subject="part one">
            <segments>
              <segment bytes="700000" number="1">abc123@news.example</segment>
              <segment bytes="700000" number="2">def456@news.example</segment>
            </segments>
          </file>
          <file poster="a@b" date="1638000000" subject="part two">
            <segments>
              <segment bytes="5000" number="1">ghi789@news.example</segment>
            </segments>
          </file>
        </nzb>"#;
        assert_eq!(
            extract_segments(manifest),
            vec![
                "abc123@news.example",
                "def456@news.example",
                "ghi789@news.example"
            ]
        );
    }

    #[test]
    fn empty_manifest_has_no_segments() {
        assert!(extract_segments("<nzb></nzb>").is_empty());
    }

    #[test]
    fn feed_item_decodes_into_release() {
        let json = r#"{
            "title": "A.Movie.2021.1080p",
            "pubDate": "Sat, 27 Nov 2021 10:00:00 +0000",
            "attr": [
                {"@attributes": {"name": "guid", "value": "g1"}},
                {"@attributes": {"name": "size", "value": "1234"}},
                {"@attributes": {"name": "imdb", "value": "0133093"}},
                {"@attributes": {"name": "imdbtitle", "value": "The Matrix"}}
            ]
        }"#;
        let item: FeedItem = serde_json::from_str(json).unwrap();
        let record = item.into_record().unwrap();
        assert_eq!(record.release_id.as_str(), "g1");
        assert_eq!(record.size_bytes, 1234);
        assert_eq!(
            record.content_key.resolved().map(|id| id.as_str()),
            Some("tt0133093")
        );
        assert_eq!(record.content_title.as_deref(), Some("The Matrix"));
        assert_eq!(record.health_status, HealthStatus::Unknown);
        assert_eq!(record.health_checked_at, record.published_at);
    }

    #[test]
    fn missing_imdb_attr_is_unresolved() {
        let json = r#"{
            "title": "Obscure.Release",
            "pubDate": "Sat, 27 Nov 2021 10:00:00 +0000",
            "attr": [
                {"@attributes": {"name": "guid", "value": "g2"}},
                {"@attributes": {"name": "size", "value": "99"}},
                {"@attributes": {"name": "imdb", "value": "0000000"}}
            ]
        }"#;
        let item: FeedItem = serde_json::from_str(json).unwrap();
        let record = item.into_record().unwrap();
        assert_eq!(record.content_key, ContentKey::Unresolved);
    }
}
