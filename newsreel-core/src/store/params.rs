use crate::error::Result;

use super::PostgresStore;

/// Durable cursor for the backfill worker: the release id it last
/// walked past. Operators edit this row directly to unstick the job.
pub const BACKFILL_CURSOR: &str = "backfill_last_release_processed";

impl PostgresStore {
    pub async fn get_parameter(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM parameters WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_parameter(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO parameters (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
