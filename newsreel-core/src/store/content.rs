use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use newsreel_model::{BestRelease, ContentInfo, ContentKind, ImdbId, ReleaseId, ReleaseRecord};

use crate::error::{CoreError, Result};

use super::PostgresStore;

#[derive(Debug, FromRow)]
struct ContentRow {
    imdb_id: String,
    kind: String,
    title: String,
    original_title: Option<String>,
    original_language: Option<String>,
    overview: Option<String>,
    genres: serde_json::Value,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<i64>,
    popularity: Option<f64>,
    runtime_minutes: Option<i64>,
    release_date: Option<NaiveDate>,
    best_release_id: String,
    best_release_title: String,
    best_release_size: i64,
    best_release_published_at: DateTime<Utc>,
}

impl ContentRow {
    fn into_info(self) -> Result<ContentInfo> {
        let kind = match self.kind.as_str() {
            "movie" => ContentKind::Movie,
            "tv" => ContentKind::Tv,
            other => {
                return Err(CoreError::Decode(format!("unknown content kind: {other}")));
            }
        };
        let genres = serde_json::from_value(self.genres)
            .map_err(|e| CoreError::Decode(format!("genres column: {e}")))?;
        Ok(ContentInfo {
            imdb_id: ImdbId::parse(self.imdb_id)?,
            kind,
            title: self.title,
            original_title: self.original_title,
            original_language: self.original_language,
            overview: self.overview,
            genres,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            vote_average: self.vote_average,
            vote_count: self.vote_count,
            popularity: self.popularity,
            runtime_minutes: self.runtime_minutes,
            release_date: self.release_date,
            best_release: BestRelease {
                release_id: ReleaseId::new(self.best_release_id),
                title: self.best_release_title,
                size_bytes: self.best_release_size,
                published_at: self.best_release_published_at,
            },
        })
    }
}

impl PostgresStore {
    pub async fn get_content(&self, imdb_id: &ImdbId) -> Result<Option<ContentInfo>> {
        let row = sqlx::query_as::<_, ContentRow>(
            "SELECT imdb_id, kind, title, original_title, original_language, overview,
                    genres, poster_path, backdrop_path, vote_average, vote_count,
                    popularity, runtime_minutes, release_date,
                    best_release_id, best_release_title, best_release_size,
                    best_release_published_at
             FROM content_info WHERE imdb_id = $1",
        )
        .bind(imdb_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ContentRow::into_info).transpose()
    }

    pub async fn put_content(&self, info: &ContentInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_info (
                imdb_id, kind, title, original_title, original_language, overview,
                genres, poster_path, backdrop_path, vote_average, vote_count,
                popularity, runtime_minutes, release_date,
                best_release_id, best_release_title, best_release_size,
                best_release_published_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18)
            ON CONFLICT (imdb_id) DO UPDATE SET
                kind = EXCLUDED.kind,
                title = EXCLUDED.title,
                original_title = EXCLUDED.original_title,
                original_language = EXCLUDED.original_language,
                overview = EXCLUDED.overview,
                genres = EXCLUDED.genres,
                poster_path = EXCLUDED.poster_path,
                backdrop_path = EXCLUDED.backdrop_path,
                vote_average = EXCLUDED.vote_average,
                vote_count = EXCLUDED.vote_count,
                popularity = EXCLUDED.popularity,
                runtime_minutes = EXCLUDED.runtime_minutes,
                release_date = EXCLUDED.release_date,
                best_release_id = EXCLUDED.best_release_id,
                best_release_title = EXCLUDED.best_release_title,
                best_release_size = EXCLUDED.best_release_size,
                best_release_published_at = EXCLUDED.best_release_published_at
            "#,
        )
        .bind(info.imdb_id.as_str())
        .bind(info.kind.as_str())
        .bind(&info.title)
        .bind(&info.original_title)
        .bind(&info.original_language)
        .bind(&info.overview)
        .bind(serde_json::to_value(&info.genres).unwrap_or_else(|_| serde_json::json!([])))
        .bind(&info.poster_path)
        .bind(&info.backdrop_path)
        .bind(info.vote_average)
        .bind(info.vote_count)
        .bind(info.popularity)
        .bind(info.runtime_minutes)
        .bind(info.release_date)
        .bind(info.best_release.release_id.as_str())
        .bind(&info.best_release.title)
        .bind(info.best_release.size_bytes)
        .bind(info.best_release.published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Moves the best-release pointer to `release`. Callers check
    /// [`ContentInfo::improves_on_best`] first; the guard here keeps the
    /// monotonic size invariant even under racing workers.
    pub async fn update_best_release(
        &self,
        imdb_id: &ImdbId,
        release: &ReleaseRecord,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE content_info
             SET best_release_id = $1, best_release_title = $2,
                 best_release_size = $3, best_release_published_at = $4
             WHERE imdb_id = $5 AND best_release_size < $3",
        )
        .bind(release.release_id.as_str())
        .bind(&release.title)
        .bind(release.size_bytes)
        .bind(release.published_at)
        .bind(imdb_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
