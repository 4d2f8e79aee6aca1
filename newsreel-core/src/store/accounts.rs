use chrono::NaiveDate;
use sqlx::FromRow;

use newsreel_model::{Account, AccountId};

use crate::error::Result;

use super::PostgresStore;

#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: String,
    min_release_date: NaiveDate,
}

impl PostgresStore {
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows =
            sqlx::query_as::<_, AccountRow>("SELECT account_id, min_release_date FROM accounts")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|row| Account {
                account_id: AccountId::new(row.account_id),
                min_release_date: row.min_release_date,
            })
            .collect())
    }

    /// Download tool server status, refreshed by the acquisition daemon
    /// on every poll so the dashboard shows a live rate.
    pub async fn set_tool_status(&self, account_id: &AccountId, download_rate: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO tool_status (account_id, download_rate, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (account_id) DO UPDATE SET
                 download_rate = EXCLUDED.download_rate,
                 updated_at = NOW()",
        )
        .bind(account_id.as_str())
        .bind(download_rate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
