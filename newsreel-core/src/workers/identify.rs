//! Asynchronous per-release identification worker.
//!
//! Consumes exactly one retry-queue message per invocation. Permanent
//! failures delete the message; transient metadata-provider failures
//! extend its visibility to just under twelve hours so the retry lands
//! after upstream rate limits reset.

use tracing::{error, info, warn};

use newsreel_model::{BestRelease, ContentKey, ImdbId};

use crate::error::{CoreError, Result};
use crate::providers::MetadataProvider;
use crate::store::{MessageQueue, PipelineStore, QueueMessage, MAX_VISIBILITY};

use super::reconcile::Reconciler;

/// How one invocation ended, for logging and the daemon loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// The release now has content info; reconciliation may have run.
    Identified,
    /// Title search definitively missed; recorded and never retried.
    NoMatch,
    /// Release was already in a terminal identification state.
    AlreadyProcessed,
    /// Transient upstream failure; message redelivery deferred.
    Deferred,
}

#[derive(Debug)]
pub struct IdentifyWorker<'a, S, Q, P> {
    store: &'a S,
    queue: &'a Q,
    provider: &'a P,
}

impl<'a, S: PipelineStore, Q: MessageQueue, P: MetadataProvider> IdentifyWorker<'a, S, Q, P> {
    pub fn new(store: &'a S, queue: &'a Q, provider: &'a P) -> Self {
        Self {
            store,
            queue,
            provider,
        }
    }

    pub async fn handle(&self, message: QueueMessage) -> Result<IdentifyOutcome> {
        let release_id = message.body.clone();
        info!(release = %release_id, "identifying release");

        let Some(release) = self.store.get_release(&release_id).await? else {
            // Permanent: nothing to retry against.
            self.queue.delete(message.receipt).await?;
            return Err(CoreError::NotFound(format!(
                "no release with id {release_id} in store"
            )));
        };

        // Resolve the content id, by stored state or by title search.
        let mut identified_now = false;
        let imdb_id: ImdbId = match &release.content_key {
            ContentKey::NoMatch => {
                warn!(release = %release_id, "already marked no-match");
                self.queue.delete(message.receipt).await?;
                return Ok(IdentifyOutcome::AlreadyProcessed);
            }
            ContentKey::Resolved(id) => id.clone(),
            ContentKey::Unresolved => match self.provider.identify_title(&release.title).await {
                Ok(Some(found)) => {
                    info!(release = %release_id, content = %found.imdb_id, "title search matched");
                    self.store
                        .set_identification(
                            &release_id,
                            &ContentKey::Resolved(found.imdb_id.clone()),
                            &found.title,
                        )
                        .await?;
                    identified_now = true;
                    found.imdb_id
                }
                Ok(None) => {
                    info!(release = %release_id, "no title match, never retrying");
                    self.store
                        .set_identification(&release_id, &ContentKey::NoMatch, "")
                        .await?;
                    self.queue.delete(message.receipt).await?;
                    return Ok(IdentifyOutcome::NoMatch);
                }
                Err(err) => {
                    error!(release = %release_id, error = %err, "title search failed, deferring");
                    self.queue
                        .extend_visibility(message.receipt, MAX_VISIBILITY)
                        .await?;
                    return Ok(IdentifyOutcome::Deferred);
                }
            },
        };

        match self.store.get_content(&imdb_id).await? {
            Some(info) => {
                if info.improves_on_best(release.size_bytes) {
                    info!(content = %imdb_id, release = %release_id, "new best release");
                    self.store.update_best_release(&imdb_id, &release).await?;
                    if identified_now {
                        self.store
                            .set_identification(
                                &release_id,
                                &ContentKey::Resolved(imdb_id.clone()),
                                &info.title,
                            )
                            .await?;
                    }
                    let refreshed = self.refreshed_content(&imdb_id).await?;
                    Reconciler::new(self.store).fan_out(&refreshed).await?;
                } else if identified_now {
                    // ContentInfo no-op, but identification state changed
                    // in this invocation: the account targets may never
                    // have seen this content id.
                    Reconciler::new(self.store).fan_out(&info).await?;
                }
            }
            None => {
                match self.provider.fetch_content(&imdb_id).await {
                    Ok(metadata) => {
                        let info = metadata.into_info(BestRelease {
                            release_id: release_id.clone(),
                            title: release.title.clone(),
                            size_bytes: release.size_bytes,
                            published_at: release.published_at,
                        });
                        info!(content = %imdb_id, title = %info.title, "content metadata fetched");
                        self.store.put_content(&info).await?;
                        if identified_now {
                            self.store
                                .set_identification(
                                    &release_id,
                                    &ContentKey::Resolved(imdb_id.clone()),
                                    &info.title,
                                )
                                .await?;
                        }
                        Reconciler::new(self.store).fan_out(&info).await?;
                    }
                    Err(err) => {
                        // Transient: defer redelivery instead of failing,
                        // upstream providers rate-limit aggressively.
                        error!(content = %imdb_id, error = %err, "metadata fetch failed, deferring");
                        self.queue
                            .extend_visibility(message.receipt, MAX_VISIBILITY)
                            .await?;
                        return Ok(IdentifyOutcome::Deferred);
                    }
                }
            }
        }

        self.queue.delete(message.receipt).await?;
        Ok(IdentifyOutcome::Identified)
    }

    /// Re-read content info after a best-release update so the fan-out
    /// sees the pointer it is propagating.
    async fn refreshed_content(&self, imdb_id: &ImdbId) -> Result<newsreel_model::ContentInfo> {
        self.store.get_content(imdb_id).await?.ok_or_else(|| {
            CoreError::Internal(format!("content info for {imdb_id} vanished mid-update"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    use newsreel_model::{Account, AccountId, ContentInfo, ContentKind, ReleaseId, ReleaseRecord};

    use crate::providers::{ContentMetadata, MetadataProvider, ProviderError, TitleMatch};
    use crate::workers::testing::{MemoryQueue, MemoryStore};

    /// Fails every call: the paths under test must not reach upstream.
    struct OfflineProvider;

    #[async_trait]
    impl MetadataProvider for OfflineProvider {
        async fn identify_title(
            &self,
            _title: &str,
        ) -> std::result::Result<Option<TitleMatch>, ProviderError> {
            Err(ProviderError::Api("unexpected title search".to_string()))
        }

        async fn fetch_content(
            &self,
            _imdb_id: &ImdbId,
        ) -> std::result::Result<ContentMetadata, ProviderError> {
            Err(ProviderError::Api("unexpected metadata fetch".to_string()))
        }
    }

    fn content_with_best(imdb_id: &ImdbId, best_id: &str, best_size: i64) -> ContentInfo {
        ContentInfo {
            imdb_id: imdb_id.clone(),
            kind: ContentKind::Movie,
            title: "Known Title".to_string(),
            original_title: None,
            original_language: None,
            overview: None,
            genres: vec![],
            poster_path: None,
            backdrop_path: None,
            vote_average: None,
            vote_count: None,
            popularity: None,
            runtime_minutes: None,
            release_date: Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            best_release: BestRelease {
                release_id: ReleaseId::new(best_id),
                title: best_id.to_string(),
                size_bytes: best_size,
                published_at: Utc.timestamp_opt(1_000, 0).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn smaller_release_leaves_best_pointer_and_targets_untouched() {
        let imdb_id = ImdbId::parse("tt0000001").unwrap();
        let store = MemoryStore::default();
        store.releases.lock().unwrap().push(ReleaseRecord::ingested(
            ReleaseId::new("r-small"),
            "smaller release".to_string(),
            300,
            Utc.timestamp_opt(2_000, 0).unwrap(),
            ContentKey::Resolved(imdb_id.clone()),
            Some("Known Title".to_string()),
        ));
        store.content.lock().unwrap().insert(
            imdb_id.as_str().to_string(),
            content_with_best(&imdb_id, "r-best", 500),
        );
        // An account that would qualify, so an erroneous fan-out would
        // leave a target row behind.
        store.accounts.lock().unwrap().push(Account {
            account_id: AccountId::new("acc"),
            min_release_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
        });
        let queue = MemoryQueue::default();
        let message = QueueMessage {
            body: ReleaseId::new("r-small"),
            receipt: Uuid::new_v4(),
        };

        let worker = IdentifyWorker::new(&store, &queue, &OfflineProvider);
        let outcome = worker.handle(message.clone()).await.unwrap();

        assert_eq!(outcome, IdentifyOutcome::Identified);
        let content = store.content.lock().unwrap();
        let info = content.get(imdb_id.as_str()).unwrap();
        assert_eq!(info.best_release.release_id.as_str(), "r-best");
        assert_eq!(info.best_release.size_bytes, 500);
        assert!(store.targets.lock().unwrap().is_empty());
        assert_eq!(*queue.deleted.lock().unwrap(), vec![message.receipt]);
        assert!(queue.extended.lock().unwrap().is_empty());
    }
}
