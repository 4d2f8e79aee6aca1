//! Bounded-budget backfill over historical releases lacking
//! identification.
//!
//! Two work streams feed it: releases whose title never matched
//! anything (`unresolved`), and releases chronologically before the
//! persisted backfill cursor that were ingested before the async
//! pipeline existed. Title searches are the expensive resource, so only
//! they consume the per-invocation budget.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::info;

use newsreel_model::{ContentKey, ReleaseRecord};

use crate::error::{CoreError, Result};
use crate::providers::MetadataProvider;
use crate::store::params::BACKFILL_CURSOR;
use crate::store::{PostgresStore, RetryQueue};

const BATCH: i64 = 100;
const PACING: Duration = Duration::from_secs(2);

/// Which stream the next unit of work comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkKind {
    /// Title search against the metadata provider. Budgeted.
    UnresolvedTitle,
    /// Cursor walk over old releases; re-queues uncached content ids.
    Chronological,
}

/// Prefer the more recently published head; a timestamp tie goes to the
/// unresolved-title stream, favoring completeness over raw chronology.
fn pick_next(
    title_head: Option<&ReleaseRecord>,
    chrono_head: Option<&ReleaseRecord>,
) -> Option<WorkKind> {
    match (title_head, chrono_head) {
        (None, None) => None,
        (Some(_), None) => Some(WorkKind::UnresolvedTitle),
        (None, Some(_)) => Some(WorkKind::Chronological),
        (Some(title), Some(chrono)) => {
            if title.published_at >= chrono.published_at {
                Some(WorkKind::UnresolvedTitle)
            } else {
                Some(WorkKind::Chronological)
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub searches: u32,
    pub requeued: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct BackfillWorker<'a, P> {
    store: &'a PostgresStore,
    queue: &'a RetryQueue,
    provider: &'a P,
    search_budget: u32,
}

impl<'a, P: MetadataProvider> BackfillWorker<'a, P> {
    pub fn new(
        store: &'a PostgresStore,
        queue: &'a RetryQueue,
        provider: &'a P,
        search_budget: u32,
    ) -> Self {
        Self {
            store,
            queue,
            provider,
            search_budget,
        }
    }

    pub async fn run(&self) -> Result<BackfillOutcome> {
        let mut left = self.search_budget;
        if left == 0 {
            return Ok(BackfillOutcome::default());
        }

        let mut unmatched: VecDeque<ReleaseRecord> = self
            .store
            .releases_by_content_key(&ContentKey::Unresolved, BATCH)
            .await?
            .into();

        let cursor_id = self
            .store
            .get_parameter(BACKFILL_CURSOR)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("parameter {BACKFILL_CURSOR} is not set"))
            })?;
        let cursor = self
            .store
            .get_release(&newsreel_model::ReleaseId::new(cursor_id.clone()))
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("backfill cursor release {cursor_id} not in store"))
            })?;

        let before = self
            .store
            .releases_published_before(cursor.published_at, BATCH)
            .await?;
        // The query is inclusive of the cursor itself; resume just past it.
        let mut unprocessed: VecDeque<ReleaseRecord> = before
            .into_iter()
            .skip_while(|item| item.release_id != cursor.release_id)
            .skip(1)
            .collect();

        let mut outcome = BackfillOutcome::default();
        while left > 0 && (!unmatched.is_empty() || !unprocessed.is_empty()) {
            match pick_next(unmatched.front(), unprocessed.front()) {
                None => break,
                Some(WorkKind::UnresolvedTitle) => {
                    let Some(item) = unmatched.pop_front() else { break };
                    left -= 1;
                    outcome.searches += 1;
                    info!(release = %item.release_id, left, "backfill title search");
                    match self.provider.identify_title(&item.title).await? {
                        Some(found) => {
                            self.store
                                .set_identification(
                                    &item.release_id,
                                    &ContentKey::Resolved(found.imdb_id),
                                    &found.title,
                                )
                                .await?;
                        }
                        None => {
                            self.store
                                .set_identification(&item.release_id, &ContentKey::NoMatch, "")
                                .await?;
                        }
                    }
                    tokio::time::sleep(PACING).await;
                }
                Some(WorkKind::Chronological) => {
                    let Some(item) = unprocessed.pop_front() else { break };
                    match &item.content_key {
                        ContentKey::Unresolved | ContentKey::NoMatch => {
                            // Sentinels never consume budget here.
                            outcome.skipped += 1;
                        }
                        ContentKey::Resolved(imdb_id) => {
                            if self.store.get_content(imdb_id).await?.is_some() {
                                outcome.skipped += 1;
                            } else {
                                info!(release = %item.release_id, content = %imdb_id, "re-queuing for identification");
                                self.queue
                                    .send(std::slice::from_ref(&item.release_id))
                                    .await?;
                                outcome.requeued += 1;
                                tokio::time::sleep(PACING).await;
                            }
                        }
                    }
                    self.store
                        .set_parameter(BACKFILL_CURSOR, item.release_id.as_str())
                        .await?;
                }
            }
        }

        info!(
            searches = outcome.searches,
            requeued = outcome.requeued,
            skipped = outcome.skipped,
            "backfill done"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use newsreel_model::ReleaseId;

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

    #[test]
    fn prefers_the_more_recent_head() {
        let title = release("t", 2000);
        let chrono = release("c", 1000);
        assert_eq!(
            pick_next(Some(&title), Some(&chrono)),
            Some(WorkKind::UnresolvedTitle)
        );
        assert_eq!(
            pick_next(Some(&chrono), Some(&title)),
            Some(WorkKind::Chronological)
        );
    }

    #[test]
    fn tie_goes_to_the_title_stream() {
        let title = release("t", 1500);
        let chrono = release("c", 1500);
        assert_eq!(
            pick_next(Some(&title), Some(&chrono)),
            Some(WorkKind::UnresolvedTitle)
        );
    }

    #[test]
    fn lone_streams_win_by_default() {
        let item = release("x", 1000);
        assert_eq!(pick_next(Some(&item), None), Some(WorkKind::UnresolvedTitle));
        assert_eq!(pick_next(None, Some(&item)), Some(WorkKind::Chronological));
        assert_eq!(pick_next(None, None), None);
    }
}
