use chrono::{DateTime, Utc};
use sqlx::FromRow;

use newsreel_model::{ContentKey, HealthStatus, ReleaseId, ReleaseRecord};

use crate::error::{CoreError, Result};

use super::PostgresStore;

#[derive(Debug, FromRow)]
struct ReleaseRow {
    release_id: String,
    title: String,
    size_bytes: i64,
    published_at: DateTime<Utc>,
    content_key: String,
    content_title: Option<String>,
    health_status: String,
    health_checked_at: DateTime<Utc>,
    health_success: i64,
    health_failure: i64,
}

impl ReleaseRow {
    fn into_record(self) -> Result<ReleaseRecord> {
        Ok(ReleaseRecord {
            release_id: ReleaseId::new(self.release_id),
            title: self.title,
            size_bytes: self.size_bytes,
            published_at: self.published_at,
            content_key: ContentKey::decode(&self.content_key)?,
            content_title: self.content_title,
            health_status: HealthStatus::parse(&self.health_status)
                .map_err(|e| CoreError::Decode(e.to_string()))?,
            health_checked_at: self.health_checked_at,
            health_success: self.health_success,
            health_failure: self.health_failure,
        })
    }
}

const RELEASE_COLUMNS: &str = "release_id, title, size_bytes, published_at, content_key, \
     content_title, health_status, health_checked_at, health_success, health_failure";

impl PostgresStore {
    pub async fn insert_release(&self, record: &ReleaseRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO releases (
                release_id, title, size_bytes, published_at, content_key,
                content_title, health_status, health_checked_at,
                health_success, health_failure
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.release_id.as_str())
        .bind(&record.title)
        .bind(record.size_bytes)
        .bind(record.published_at)
        .bind(record.content_key.encode())
        .bind(&record.content_title)
        .bind(record.health_status.as_str())
        .bind(record.health_checked_at)
        .bind(record.health_success)
        .bind(record.health_failure)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_release(&self, release_id: &ReleaseId) -> Result<Option<ReleaseRecord>> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE release_id = $1"
        ))
        .bind(release_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReleaseRow::into_record).transpose()
    }

    /// Rollback path for the ingester: removes a release inserted in the
    /// same run whose identification failed.
    pub async fn delete_release(&self, release_id: &ReleaseId) -> Result<()> {
        sqlx::query("DELETE FROM releases WHERE release_id = $1")
            .bind(release_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The most recently published release we have, i.e. the ingest
    /// cursor.
    pub async fn latest_release(&self) -> Result<Option<ReleaseRecord>> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases ORDER BY published_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReleaseRow::into_record).transpose()
    }

    pub async fn set_identification(
        &self,
        release_id: &ReleaseId,
        content_key: &ContentKey,
        content_title: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE releases SET content_key = $1, content_title = $2 WHERE release_id = $3",
        )
        .bind(content_key.encode())
        .bind(content_title)
        .bind(release_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Releases carrying the given identification state, most recent
    /// first. Used by the backfill worker to find unresolved titles.
    pub async fn releases_by_content_key(
        &self,
        content_key: &ContentKey,
        limit: i64,
    ) -> Result<Vec<ReleaseRecord>> {
        let rows = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases
             WHERE content_key = $1
             ORDER BY published_at DESC
             LIMIT $2"
        ))
        .bind(content_key.encode())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReleaseRow::into_record).collect()
    }

    /// Releases published at or before `cutoff`, most recent first.
    pub async fn releases_published_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReleaseRecord>> {
        let rows = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases
             WHERE published_at <= $1
             ORDER BY published_at DESC
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReleaseRow::into_record).collect()
    }

    /// The least-recently-checked release still awaiting a health
    /// verdict.
    pub async fn next_health_candidate(&self) -> Result<Option<ReleaseRecord>> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases
             WHERE health_status = $1
             ORDER BY health_checked_at ASC
             LIMIT 1"
        ))
        .bind(HealthStatus::Unknown.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReleaseRow::into_record).transpose()
    }

    pub async fn update_health(
        &self,
        release_id: &ReleaseId,
        status: HealthStatus,
        success: i64,
        failure: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE releases
             SET health_status = $1, health_checked_at = NOW(),
                 health_success = $2, health_failure = $3
             WHERE release_id = $4",
        )
        .bind(status.as_str())
        .bind(success)
        .bind(failure)
        .bind(release_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
