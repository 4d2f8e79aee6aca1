//! Registry ingester: cursor-based incremental scrape of the indexer
//! feed.

use async_trait::async_trait;
use tracing::{error, info, warn};

use newsreel_model::{ContentKey, ReleaseRecord};

use crate::error::Result;
use crate::indexer::{FeedPage, IndexerClient};
use crate::providers::MetadataProvider;
use crate::store::{MessageQueue, PipelineStore};

/// Feed seam: one page of releases, most recent first. `Ok(None)` means
/// the upstream rate limit tripped and the invocation should quietly
/// stop.
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn page(&self, offset: usize) -> Result<Option<Vec<ReleaseRecord>>>;
}

#[async_trait]
impl ReleaseFeed for IndexerClient {
    async fn page(&self, offset: usize) -> Result<Option<Vec<ReleaseRecord>>> {
        match self.movie_page(offset).await? {
            FeedPage::Items(items) => Ok(Some(items)),
            FeedPage::RateLimited => Ok(None),
        }
    }
}

/// What one ingester invocation did, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub enqueued: usize,
    /// True when a mid-batch identification failure rolled back the last
    /// insert and halted the run.
    pub halted: bool,
    pub rate_limited: bool,
}

/// Index into `items` (a feed page, most recent first) of the first
/// entry at or beyond the cursor: either the cursor's own release or
/// anything published before it.
fn cursor_index(items: &[ReleaseRecord], cursor: &ReleaseRecord) -> Option<usize> {
    items.iter().position(|item| {
        item.release_id == cursor.release_id || item.published_at < cursor.published_at
    })
}

/// Walk the feed newest-first, collecting everything strictly newer
/// than the cursor. Stops at the cursor's release, at the first item
/// published before it, or at an empty page. `None` on rate limit.
async fn collect_newer_than<F: ReleaseFeed>(
    feed: &F,
    cursor: &ReleaseRecord,
) -> Result<Option<Vec<ReleaseRecord>>> {
    let mut offset = 0;
    let mut collected = Vec::new();
    loop {
        let Some(items) = feed.page(offset).await? else {
            return Ok(None);
        };
        if items.is_empty() {
            return Ok(Some(collected));
        }
        offset += items.len();
        match cursor_index(&items, cursor) {
            Some(index) => {
                collected.extend(items.into_iter().take(index));
                return Ok(Some(collected));
            }
            None => collected.extend(items),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SyncIdentification {
    /// Nothing left to do for this release in this run.
    Settled,
    /// Needs the asynchronous identification worker.
    NeedsWorker,
}

#[derive(Debug)]
pub struct Ingester<'a, S, Q, F, P> {
    store: &'a S,
    queue: &'a Q,
    feed: &'a F,
    provider: &'a P,
}

impl<'a, S: PipelineStore, Q: MessageQueue, F: ReleaseFeed, P: MetadataProvider>
    Ingester<'a, S, Q, F, P>
{
    pub fn new(store: &'a S, queue: &'a Q, feed: &'a F, provider: &'a P) -> Self {
        Self {
            store,
            queue,
            feed,
            provider,
        }
    }

    pub async fn run(&self) -> Result<IngestOutcome> {
        let Some(cursor) = self.store.latest_release().await? else {
            warn!("no ingest cursor: the releases table is empty, seed it before ingesting");
            return Ok(IngestOutcome::default());
        };
        info!(cursor = %cursor.release_id, "ingesting releases newer than cursor");

        let Some(mut new_items) = collect_newer_than(self.feed, &cursor).await? else {
            info!("indexer rate limit reached, skipping this run");
            return Ok(IngestOutcome {
                rate_limited: true,
                ..IngestOutcome::default()
            });
        };

        // Oldest first. If identification fails partway through, the
        // items inserted so far leave `latest_release` pointing at a
        // coherent cursor for the next run.
        new_items.sort_by_key(|item| item.published_at);
        info!(count = new_items.len(), "new releases collected");

        let mut outcome = IngestOutcome::default();
        for item in new_items {
            self.store.insert_release(&item).await?;
            outcome.inserted += 1;
            match self.identify_sync(&item).await {
                Ok(SyncIdentification::Settled) => {}
                Ok(SyncIdentification::NeedsWorker) => {
                    self.queue.send(std::slice::from_ref(&item.release_id)).await?;
                    outcome.enqueued += 1;
                }
                Err(err) => {
                    // Transient upstream failure: revert the write so the
                    // cursor stays coherent, and stop the batch.
                    error!(release = %item.release_id, error = %err, "identification failed, rolling back");
                    self.store.delete_release(&item.release_id).await?;
                    outcome.inserted -= 1;
                    outcome.halted = true;
                    break;
                }
            }
        }
        Ok(outcome)
    }

    async fn identify_sync(&self, item: &ReleaseRecord) -> Result<SyncIdentification> {
        match &item.content_key {
            ContentKey::Resolved(imdb_id) => {
                match self.store.get_content(imdb_id).await? {
                    Some(info) => {
                        if info.improves_on_best(item.size_bytes) {
                            info!(content = %imdb_id, release = %item.release_id, "new best release");
                            self.store.update_best_release(imdb_id, item).await?;
                        }
                        Ok(SyncIdentification::Settled)
                    }
                    // Metadata fetch is the identification worker's job.
                    None => Ok(SyncIdentification::NeedsWorker),
                }
            }
            ContentKey::Unresolved => match self.provider.identify_title(&item.title).await {
                Ok(Some(found)) => {
                    info!(release = %item.release_id, content = %found.imdb_id, "title search matched");
                    self.store
                        .set_identification(
                            &item.release_id,
                            &ContentKey::Resolved(found.imdb_id),
                            &found.title,
                        )
                        .await?;
                    Ok(SyncIdentification::NeedsWorker)
                }
                Ok(None) => {
                    info!(release = %item.release_id, "no title match, marking permanently");
                    self.store
                        .set_identification(&item.release_id, &ContentKey::NoMatch, "")
                        .await?;
                    Ok(SyncIdentification::Settled)
                }
                Err(err) => Err(err.into()),
            },
            ContentKey::NoMatch => Ok(SyncIdentification::Settled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use newsreel_model::{ImdbId, ReleaseId};

    use crate::providers::{ContentMetadata, ProviderError, TitleMatch};
    use crate::workers::testing::{MemoryQueue, MemoryStore};

    fn release(id: &str, ts: i64) -> ReleaseRecord {
        ReleaseRecord::ingested(
            ReleaseId::new(id),
            format!("title {id}"),
            100,
            Utc.timestamp_opt(ts, 0).unwrap(),
            ContentKey::Unresolved,
            None,
        )
    }

    struct StubFeed {
        pages: Vec<Vec<ReleaseRecord>>,
    }

    #[async_trait]
    impl ReleaseFeed for StubFeed {
        async fn page(&self, offset: usize) -> Result<Option<Vec<ReleaseRecord>>> {
            let mut skipped = 0;
            for page in &self.pages {
                if skipped == offset {
                    return Ok(Some(page.clone()));
                }
                skipped += page.len();
            }
            Ok(Some(Vec::new()))
        }
    }

    #[test]
    fn cursor_index_matches_on_id_or_older_publish_time() {
        let cursor = release("g1", 1000);
        let items = vec![release("g3", 1300), release("g2", 1200), release("g1", 1000)];
        assert_eq!(cursor_index(&items, &cursor), Some(2));

        // Cursor id missing from the page but an older item is present.
        let items = vec![release("g3", 1300), release("g0", 900)];
        assert_eq!(cursor_index(&items, &cursor), Some(1));

        let items = vec![release("g3", 1300), release("g2", 1200)];
        assert_eq!(cursor_index(&items, &cursor), None);
    }

    #[tokio::test]
    async fn collects_items_strictly_newer_than_cursor() {
        let cursor = release("g1", 1000);
        let feed = StubFeed {
            pages: vec![vec![
                release("g3", 1300),
                release("g2", 1200),
                release("g1", 1000),
            ]],
        };
        let collected = collect_newer_than(&feed, &cursor).await.unwrap().unwrap();
        let ids: Vec<&str> = collected.iter().map(|r| r.release_id.as_str()).collect();
        assert_eq!(ids, vec!["g3", "g2"]);

        // Sorted ascending, the ingester persists g2 then g3.
        let mut sorted = collected;
        sorted.sort_by_key(|item| item.published_at);
        let ids: Vec<&str> = sorted.iter().map(|r| r.release_id.as_str()).collect();
        assert_eq!(ids, vec!["g2", "g3"]);
    }

    #[tokio::test]
    async fn spans_pages_until_cursor_found() {
        let cursor = release("g1", 1000);
        let feed = StubFeed {
            pages: vec![
                vec![release("g5", 1500), release("g4", 1400)],
                vec![release("g3", 1300), release("g1", 1000)],
            ],
        };
        let collected = collect_newer_than(&feed, &cursor).await.unwrap().unwrap();
        let ids: Vec<&str> = collected.iter().map(|r| r.release_id.as_str()).collect();
        assert_eq!(ids, vec!["g5", "g4", "g3"]);
    }

    /// Misses every title, except one that always fails transiently.
    struct FlakyProvider {
        failing_title: &'static str,
    }

    #[async_trait]
    impl MetadataProvider for FlakyProvider {
        async fn identify_title(
            &self,
            title: &str,
        ) -> std::result::Result<Option<TitleMatch>, ProviderError> {
            if title == self.failing_title {
                Err(ProviderError::RateLimited)
            } else {
                Ok(None)
            }
        }

        async fn fetch_content(
            &self,
            _imdb_id: &ImdbId,
        ) -> std::result::Result<ContentMetadata, ProviderError> {
            Err(ProviderError::NotFound)
        }
    }

    #[tokio::test]
    async fn identification_failure_rolls_back_last_insert_and_halts() {
        let store = MemoryStore::default();
        store.releases.lock().unwrap().push(release("g1", 1000));
        let queue = MemoryQueue::default();
        let feed = StubFeed {
            pages: vec![vec![
                release("g4", 1400),
                release("g3", 1300),
                release("g2", 1200),
                release("g1", 1000),
            ]],
        };
        let provider = FlakyProvider {
            failing_title: "title g4",
        };

        let outcome = Ingester::new(&store, &queue, &feed, &provider)
            .run()
            .await
            .unwrap();

        assert!(outcome.halted);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.enqueued, 0);
        // g2 and g3 stay persisted, the failed g4 was reverted so the
        // next run's cursor picks it up again.
        let ids: Vec<String> = store
            .releases
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.release_id.as_str().to_string())
            .collect();
        assert!(ids.contains(&"g2".to_string()));
        assert!(ids.contains(&"g3".to_string()));
        assert!(!ids.contains(&"g4".to_string()));
        let cursor = store.latest_release().await.unwrap().unwrap();
        assert_eq!(cursor.release_id.as_str(), "g3");
    }

    #[tokio::test]
    async fn empty_page_terminates_pagination() {
        let cursor = release("g1", 1000);
        let feed = StubFeed {
            pages: vec![vec![release("g2", 1200)]],
        };
        let collected = collect_newer_than(&feed, &cursor).await.unwrap().unwrap();
        assert_eq!(collected.len(), 1);
    }
}
