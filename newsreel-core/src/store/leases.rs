use std::time::Duration;

use chrono::{DateTime, Utc};

use newsreel_model::{AccountId, ReleaseId};

use crate::error::{CoreError, Result};

use super::PostgresStore;

impl PostgresStore {
    /// Claim a download lease for (account, release). Returns false when
    /// another daemon process holds a live lease. An expired lease is
    /// taken over, so a crashed daemon only blocks a restart for the TTL.
    pub async fn acquire_download_lease(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        ttl: Duration,
    ) -> Result<bool> {
        let expires_at: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| CoreError::Internal(e.to_string()))?;
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO download_leases (account_id, release_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, release_id) DO UPDATE SET
                expires_at = EXCLUDED.expires_at
            WHERE download_leases.expires_at < NOW()
            RETURNING release_id
            "#,
        )
        .bind(account_id.as_str())
        .bind(release_id.as_str())
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed.is_some())
    }

    pub async fn release_download_lease(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
    ) -> Result<()> {
        sqlx::query("DELETE FROM download_leases WHERE account_id = $1 AND release_id = $2")
            .bind(account_id.as_str())
            .bind(release_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
