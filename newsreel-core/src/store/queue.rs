use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use newsreel_model::ReleaseId;

use crate::error::{CoreError, Result};

/// Hard ceiling on deferred retry, just under the 12-hour redelivery
/// window the upstream providers' rate limits are sized against.
pub const MAX_VISIBILITY: Duration = Duration::from_secs((12 * 60 - 1) * 60);

/// Redelivery delay applied when a message is claimed. A consumer that
/// neither deletes nor extends within this window gets the message
/// back.
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(5 * 60);

/// A claimed message. The receipt is rotated on every claim so a stale
/// consumer cannot delete a message that was already redelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: ReleaseId,
    pub receipt: Uuid,
}

#[derive(Debug, FromRow)]
struct ClaimedRow {
    body: String,
    receipt: Uuid,
}

/// Producer/settlement side of the retry queue as the workers see it.
/// Receiving stays on [`RetryQueue`] directly; only the daemon loop
/// claims messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, release_ids: &[ReleaseId]) -> Result<()>;
    async fn delete(&self, receipt: Uuid) -> Result<()>;
    async fn extend_visibility(&self, receipt: Uuid, extension: Duration) -> Result<()>;
}

#[async_trait]
impl MessageQueue for RetryQueue {
    async fn send(&self, release_ids: &[ReleaseId]) -> Result<()> {
        RetryQueue::send(self, release_ids).await
    }

    async fn delete(&self, receipt: Uuid) -> Result<()> {
        RetryQueue::delete(self, receipt).await
    }

    async fn extend_visibility(&self, receipt: Uuid, extension: Duration) -> Result<()> {
        RetryQueue::extend_visibility(self, receipt, extension).await
    }
}

/// Send/receive adapter over the Postgres-backed retry queue with
/// per-message visibility-timeout control.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    pool: PgPool,
}

impl RetryQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue release ids for asynchronous identification. One
    /// multi-row insert regardless of batch size.
    pub async fn send(&self, release_ids: &[ReleaseId]) -> Result<()> {
        if release_ids.is_empty() {
            return Ok(());
        }
        let bodies: Vec<String> = release_ids
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();
        sqlx::query("INSERT INTO retry_queue (body) SELECT body FROM UNNEST($1::text[]) AS t(body)")
            .bind(&bodies)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Claim the oldest visible message, if any, making it invisible for
    /// the default visibility window. `SKIP LOCKED` keeps concurrent
    /// consumers from claiming the same row.
    pub async fn receive(&self) -> Result<Option<QueueMessage>> {
        let visible_until: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(DEFAULT_VISIBILITY)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE retry_queue
            SET visible_at = $1, receipt = gen_random_uuid()
            WHERE message_id = (
                SELECT message_id FROM retry_queue
                WHERE visible_at <= NOW()
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING body, receipt
            "#,
        )
        .bind(visible_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| QueueMessage {
            body: ReleaseId::new(row.body),
            receipt: row.receipt,
        }))
    }

    /// Delete-on-completion. A no-op if the message was already
    /// redelivered under a new receipt.
    pub async fn delete(&self, receipt: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM retry_queue WHERE receipt = $1")
            .bind(receipt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Push the redelivery time further out, deferring the retry
    /// without losing the message. Capped at [`MAX_VISIBILITY`].
    pub async fn extend_visibility(&self, receipt: Uuid, extension: Duration) -> Result<()> {
        let extension = extension.min(MAX_VISIBILITY);
        let visible_until: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(extension)
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        sqlx::query("UPDATE retry_queue SET visible_at = $1 WHERE receipt = $2")
            .bind(visible_until)
            .bind(receipt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
