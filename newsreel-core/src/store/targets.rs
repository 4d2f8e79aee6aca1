use chrono::{DateTime, Utc};
use sqlx::FromRow;

use newsreel_model::{
    AccountId, AccountTarget, DownloadStatus, ImdbId, ReleaseId, TargetState,
};

use crate::error::{CoreError, Result};

use super::PostgresStore;

#[derive(Debug, FromRow)]
struct TargetRow {
    account_id: String,
    release_id: String,
    content_id: String,
    release_title: String,
    release_size: i64,
    published_at: DateTime<Utc>,
    target_state: String,
    download_status: Option<serde_json::Value>,
}

impl TargetRow {
    fn into_target(self) -> Result<AccountTarget> {
        let download_status = self
            .download_status
            .map(serde_json::from_value::<DownloadStatus>)
            .transpose()
            .map_err(|e| CoreError::Decode(format!("download_status column: {e}")))?;
        Ok(AccountTarget {
            account_id: AccountId::new(self.account_id),
            release_id: ReleaseId::new(self.release_id),
            content_id: ImdbId::parse(self.content_id)?,
            release_title: self.release_title,
            release_size: self.release_size,
            published_at: self.published_at,
            target_state: TargetState::parse(&self.target_state)
                .map_err(|e| CoreError::Decode(e.to_string()))?,
            download_status,
        })
    }
}

const TARGET_COLUMNS: &str = "account_id, release_id, content_id, release_title, release_size, \
     published_at, target_state, download_status";

impl PostgresStore {
    /// All releases ever offered to `account` for one title.
    pub async fn targets_by_content(
        &self,
        account_id: &AccountId,
        content_id: &ImdbId,
    ) -> Result<Vec<AccountTarget>> {
        let rows = sqlx::query_as::<_, TargetRow>(&format!(
            "SELECT {TARGET_COLUMNS} FROM account_targets
             WHERE account_id = $1 AND content_id = $2"
        ))
        .bind(account_id.as_str())
        .bind(content_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TargetRow::into_target).collect()
    }

    /// Everything awaiting a given action for `account`.
    pub async fn targets_by_state(
        &self,
        account_id: &AccountId,
        state: TargetState,
    ) -> Result<Vec<AccountTarget>> {
        let rows = sqlx::query_as::<_, TargetRow>(&format!(
            "SELECT {TARGET_COLUMNS} FROM account_targets
             WHERE account_id = $1 AND target_state = $2"
        ))
        .bind(account_id.as_str())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TargetRow::into_target).collect()
    }

    pub async fn insert_target(&self, target: &AccountTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_targets (
                account_id, release_id, content_id, release_title,
                release_size, published_at, target_state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, release_id) DO UPDATE SET
                target_state = EXCLUDED.target_state
            "#,
        )
        .bind(target.account_id.as_str())
        .bind(target.release_id.as_str())
        .bind(target.content_id.as_str())
        .bind(&target.release_title)
        .bind(target.release_size)
        .bind(target.published_at)
        .bind(target.target_state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_target_state(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        state: TargetState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE account_targets SET target_state = $1
             WHERE account_id = $2 AND release_id = $3",
        )
        .bind(state.as_str())
        .bind(account_id.as_str())
        .bind(release_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Written only by the acquisition daemon. `None` clears the status
    /// after a local delete.
    pub async fn set_download_status(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        status: Option<&DownloadStatus>,
    ) -> Result<()> {
        let json = status
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::Decode(format!("download status encode: {e}")))?;
        sqlx::query(
            "UPDATE account_targets SET download_status = $1
             WHERE account_id = $2 AND release_id = $3",
        )
        .bind(json)
        .bind(account_id.as_str())
        .bind(release_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
