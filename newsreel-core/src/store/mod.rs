//! Persistent store adapters backed by PostgreSQL.
//!
//! The store is the sole source of truth shared by the workers. Every
//! mutation is a single-statement write; cross-record invariants are
//! re-derived by the next reconciliation trigger rather than enforced
//! transactionally.

mod accounts;
mod content;
mod leases;
pub mod params;
mod queue;
mod releases;
mod targets;

pub use queue::{MessageQueue, QueueMessage, RetryQueue, MAX_VISIBILITY};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use newsreel_model::{
    Account, AccountId, AccountTarget, ContentInfo, ContentKey, ImdbId, ReleaseId, ReleaseRecord,
    TargetState,
};

use crate::error::Result;

/// The persistence operations the pipeline workers go through. Backed
/// by [`PostgresStore`] in production; tests substitute in-memory
/// fakes.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn latest_release(&self) -> Result<Option<ReleaseRecord>>;
    async fn insert_release(&self, record: &ReleaseRecord) -> Result<()>;
    async fn delete_release(&self, release_id: &ReleaseId) -> Result<()>;
    async fn get_release(&self, release_id: &ReleaseId) -> Result<Option<ReleaseRecord>>;
    async fn set_identification(
        &self,
        release_id: &ReleaseId,
        content_key: &ContentKey,
        content_title: &str,
    ) -> Result<()>;

    async fn get_content(&self, imdb_id: &ImdbId) -> Result<Option<ContentInfo>>;
    async fn put_content(&self, info: &ContentInfo) -> Result<()>;
    async fn update_best_release(&self, imdb_id: &ImdbId, release: &ReleaseRecord) -> Result<()>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;
    async fn targets_by_content(
        &self,
        account_id: &AccountId,
        content_id: &ImdbId,
    ) -> Result<Vec<AccountTarget>>;
    async fn set_target_state(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        state: TargetState,
    ) -> Result<()>;
    async fn insert_target(&self, target: &AccountTarget) -> Result<()>;
}

#[async_trait]
impl PipelineStore for PostgresStore {
    async fn latest_release(&self) -> Result<Option<ReleaseRecord>> {
        PostgresStore::latest_release(self).await
    }

    async fn insert_release(&self, record: &ReleaseRecord) -> Result<()> {
        PostgresStore::insert_release(self, record).await
    }

    async fn delete_release(&self, release_id: &ReleaseId) -> Result<()> {
        PostgresStore::delete_release(self, release_id).await
    }

    async fn get_release(&self, release_id: &ReleaseId) -> Result<Option<ReleaseRecord>> {
        PostgresStore::get_release(self, release_id).await
    }

    async fn set_identification(
        &self,
        release_id: &ReleaseId,
        content_key: &ContentKey,
        content_title: &str,
    ) -> Result<()> {
        PostgresStore::set_identification(self, release_id, content_key, content_title).await
    }

    async fn get_content(&self, imdb_id: &ImdbId) -> Result<Option<ContentInfo>> {
        PostgresStore::get_content(self, imdb_id).await
    }

    async fn put_content(&self, info: &ContentInfo) -> Result<()> {
        PostgresStore::put_content(self, info).await
    }

    async fn update_best_release(&self, imdb_id: &ImdbId, release: &ReleaseRecord) -> Result<()> {
        PostgresStore::update_best_release(self, imdb_id, release).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        PostgresStore::list_accounts(self).await
    }

    async fn targets_by_content(
        &self,
        account_id: &AccountId,
        content_id: &ImdbId,
    ) -> Result<Vec<AccountTarget>> {
        PostgresStore::targets_by_content(self, account_id, content_id).await
    }

    async fn set_target_state(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        state: TargetState,
    ) -> Result<()> {
        PostgresStore::set_target_state(self, account_id, release_id, state).await
    }

    async fn insert_target(&self, target: &AccountTarget) -> Result<()> {
        PostgresStore::insert_target(self, target).await
    }
}

/// Typed access to the record collections described in the data model.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and secondary indexes if they do not exist yet.
    /// PostgreSQL's `CREATE ... IF NOT EXISTS` makes this safe to run on
    /// every startup.
    pub async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                release_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                size_bytes BIGINT NOT NULL,
                published_at TIMESTAMPTZ NOT NULL,
                content_key TEXT NOT NULL,
                content_title TEXT,
                health_status TEXT NOT NULL,
                health_checked_at TIMESTAMPTZ NOT NULL,
                health_success BIGINT NOT NULL DEFAULT 0,
                health_failure BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS releases_by_published_at
             ON releases (published_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS releases_by_content_key
             ON releases (content_key, published_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS releases_by_health
             ON releases (health_status, health_checked_at ASC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_info (
                imdb_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                original_title TEXT,
                original_language TEXT,
                overview TEXT,
                genres JSONB NOT NULL DEFAULT '[]'::jsonb,
                poster_path TEXT,
                backdrop_path TEXT,
                vote_average DOUBLE PRECISION,
                vote_count BIGINT,
                popularity DOUBLE PRECISION,
                runtime_minutes BIGINT,
                release_date DATE,
                best_release_id TEXT NOT NULL,
                best_release_title TEXT NOT NULL,
                best_release_size BIGINT NOT NULL,
                best_release_published_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_targets (
                account_id TEXT NOT NULL,
                release_id TEXT NOT NULL,
                content_id TEXT NOT NULL,
                release_title TEXT NOT NULL,
                release_size BIGINT NOT NULL,
                published_at TIMESTAMPTZ NOT NULL,
                target_state TEXT NOT NULL,
                download_status JSONB,
                PRIMARY KEY (account_id, release_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS account_targets_by_content
             ON account_targets (account_id, content_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS account_targets_by_state
             ON account_targets (account_id, target_state)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                min_release_date DATE NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_status (
                account_id TEXT PRIMARY KEY,
                download_rate BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parameters (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retry_queue (
                message_id BIGSERIAL PRIMARY KEY,
                body TEXT NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                receipt UUID
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS retry_queue_by_visible_at
             ON retry_queue (visible_at, enqueued_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS download_leases (
                account_id TEXT NOT NULL,
                release_id TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (account_id, release_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("store schema initialized");
        Ok(())
    }
}
