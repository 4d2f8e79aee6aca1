//! In-memory store and queue doubles for worker tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use newsreel_model::{
    Account, AccountId, AccountTarget, BestRelease, ContentInfo, ContentKey, ImdbId, ReleaseId,
    ReleaseRecord, TargetState,
};

use crate::error::Result;
use crate::store::{MessageQueue, PipelineStore};

/// Mutex-backed [`PipelineStore`]. Tests seed the collections directly
/// and inspect them after a worker run.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub releases: Mutex<Vec<ReleaseRecord>>,
    pub content: Mutex<HashMap<String, ContentInfo>>,
    pub accounts: Mutex<Vec<Account>>,
    pub targets: Mutex<Vec<AccountTarget>>,
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn latest_release(&self) -> Result<Option<ReleaseRecord>> {
        let releases = self.releases.lock().unwrap();
        Ok(releases.iter().max_by_key(|r| r.published_at).cloned())
    }

    async fn insert_release(&self, record: &ReleaseRecord) -> Result<()> {
        self.releases.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn delete_release(&self, release_id: &ReleaseId) -> Result<()> {
        self.releases
            .lock()
            .unwrap()
            .retain(|r| r.release_id != *release_id);
        Ok(())
    }

    async fn get_release(&self, release_id: &ReleaseId) -> Result<Option<ReleaseRecord>> {
        let releases = self.releases.lock().unwrap();
        Ok(releases
            .iter()
            .find(|r| r.release_id == *release_id)
            .cloned())
    }

    async fn set_identification(
        &self,
        release_id: &ReleaseId,
        content_key: &ContentKey,
        content_title: &str,
    ) -> Result<()> {
        let mut releases = self.releases.lock().unwrap();
        if let Some(release) = releases.iter_mut().find(|r| r.release_id == *release_id) {
            release.content_key = content_key.clone();
            release.content_title = if content_title.is_empty() {
                None
            } else {
                Some(content_title.to_string())
            };
        }
        Ok(())
    }

    async fn get_content(&self, imdb_id: &ImdbId) -> Result<Option<ContentInfo>> {
        Ok(self.content.lock().unwrap().get(imdb_id.as_str()).cloned())
    }

    async fn put_content(&self, info: &ContentInfo) -> Result<()> {
        self.content
            .lock()
            .unwrap()
            .insert(info.imdb_id.as_str().to_string(), info.clone());
        Ok(())
    }

    async fn update_best_release(&self, imdb_id: &ImdbId, release: &ReleaseRecord) -> Result<()> {
        let mut content = self.content.lock().unwrap();
        if let Some(info) = content.get_mut(imdb_id.as_str()) {
            // Conditional write, same guard as the SQL statement: the
            // pointer only moves on a strictly larger release.
            if release.size_bytes > info.best_release.size_bytes {
                info.best_release = BestRelease {
                    release_id: release.release_id.clone(),
                    title: release.title.clone(),
                    size_bytes: release.size_bytes,
                    published_at: release.published_at,
                };
            }
        }
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn targets_by_content(
        &self,
        account_id: &AccountId,
        content_id: &ImdbId,
    ) -> Result<Vec<AccountTarget>> {
        let targets = self.targets.lock().unwrap();
        Ok(targets
            .iter()
            .filter(|t| t.account_id == *account_id && t.content_id == *content_id)
            .cloned()
            .collect())
    }

    async fn set_target_state(
        &self,
        account_id: &AccountId,
        release_id: &ReleaseId,
        state: TargetState,
    ) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        if let Some(target) = targets
            .iter_mut()
            .find(|t| t.account_id == *account_id && t.release_id == *release_id)
        {
            target.target_state = state;
        }
        Ok(())
    }

    async fn insert_target(&self, target: &AccountTarget) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        match targets
            .iter_mut()
            .find(|t| t.account_id == target.account_id && t.release_id == target.release_id)
        {
            Some(existing) => existing.target_state = target.target_state,
            None => targets.push(target.clone()),
        }
        Ok(())
    }
}

/// Recording [`MessageQueue`]: every call is captured for assertions,
/// nothing is redelivered.
#[derive(Debug, Default)]
pub(crate) struct MemoryQueue {
    pub sent: Mutex<Vec<ReleaseId>>,
    pub deleted: Mutex<Vec<Uuid>>,
    pub extended: Mutex<Vec<(Uuid, Duration)>>,
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, release_ids: &[ReleaseId]) -> Result<()> {
        self.sent.lock().unwrap().extend_from_slice(release_ids);
        Ok(())
    }

    async fn delete(&self, receipt: Uuid) -> Result<()> {
        self.deleted.lock().unwrap().push(receipt);
        Ok(())
    }

    async fn extend_visibility(&self, receipt: Uuid, extension: Duration) -> Result<()> {
        self.extended.lock().unwrap().push((receipt, extension));
        Ok(())
    }
}
