//! Per-account target-state reconciliation.
//!
//! Runs whenever a release becomes the first or the new best known
//! release for a content id, and realizes a last-write-wins,
//! single-active-release-per-title policy per account.

use tracing::{debug, info, warn};

use newsreel_model::{AccountTarget, BestRelease, ContentInfo, ReleaseId, TargetState};

use crate::error::Result;
use crate::store::PipelineStore;

/// Actions reconciliation derives for one account, from the rows that
/// already exist for the content id.
#[derive(Debug, PartialEq, Eq)]
struct TargetPlan {
    /// Rows superseded by the new best release.
    downgrade: Vec<ReleaseId>,
    /// Whether to offer the new release at all.
    insert: bool,
}

fn plan_targets(existing: &[AccountTarget], new_release: &ReleaseId) -> TargetPlan {
    let already_offered = existing.iter().any(|t| t.release_id == *new_release);
    // "I deleted every version, stop offering": respected only when the
    // account has actually seen at least one version.
    let all_abandoned = !existing.is_empty()
        && existing.iter().all(|t| t.target_state == TargetState::Delete);
    let downgrade = existing
        .iter()
        .filter(|t| t.release_id != *new_release && t.target_state == TargetState::Download)
        .map(|t| t.release_id.clone())
        .collect();
    TargetPlan {
        downgrade,
        insert: !already_offered && !all_abandoned,
    }
}

#[derive(Debug)]
pub struct Reconciler<'a, S> {
    store: &'a S,
}

impl<'a, S: PipelineStore> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Fan out the new best release of `content` to every qualifying
    /// account. Writes are single-key; a crash mid-fanout is repaired by
    /// the next trigger re-deriving the same plan.
    pub async fn fan_out(&self, content: &ContentInfo) -> Result<()> {
        let BestRelease {
            release_id,
            title,
            size_bytes,
            published_at,
        } = &content.best_release;

        let Some(release_date) = content.release_date else {
            warn!(content = %content.imdb_id, "content has no release date, not offering to any account");
            return Ok(());
        };

        for account in self.store.list_accounts().await? {
            if release_date < account.min_release_date {
                debug!(account = %account.account_id, content = %content.imdb_id,
                       "release date below account threshold");
                continue;
            }
            let existing = self
                .store
                .targets_by_content(&account.account_id, &content.imdb_id)
                .await?;
            let plan = plan_targets(&existing, release_id);
            for superseded in &plan.downgrade {
                info!(account = %account.account_id, release = %superseded, "downgrading superseded release");
                self.store
                    .set_target_state(&account.account_id, superseded, TargetState::Delete)
                    .await?;
            }
            if plan.insert {
                info!(account = %account.account_id, release = %release_id, "offering new best release");
                self.store
                    .insert_target(&AccountTarget {
                        account_id: account.account_id.clone(),
                        release_id: release_id.clone(),
                        content_id: content.imdb_id.clone(),
                        release_title: title.clone(),
                        release_size: *size_bytes,
                        published_at: *published_at,
                        target_state: TargetState::Download,
                        download_status: None,
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use newsreel_model::{AccountId, ImdbId};

    fn target(release: &str, state: TargetState) -> AccountTarget {
        AccountTarget {
            account_id: AccountId::new("acc"),
            release_id: ReleaseId::new(release),
            content_id: ImdbId::parse("tt0000001").unwrap(),
            release_title: release.to_string(),
            release_size: 100,
            published_at: Utc.timestamp_opt(1_000, 0).unwrap(),
            target_state: state,
            download_status: None,
        }
    }

    #[test]
    fn first_release_for_a_title_is_offered() {
        let plan = plan_targets(&[], &ReleaseId::new("r1"));
        assert_eq!(
            plan,
            TargetPlan {
                downgrade: vec![],
                insert: true
            }
        );
    }

    #[test]
    fn superseded_download_rows_are_downgraded() {
        let existing = vec![
            target("r1", TargetState::Download),
            target("r2", TargetState::Delete),
        ];
        let plan = plan_targets(&existing, &ReleaseId::new("r3"));
        assert_eq!(plan.downgrade, vec![ReleaseId::new("r1")]);
        assert!(plan.insert);
    }

    #[test]
    fn force_download_rows_are_left_alone() {
        let existing = vec![target("r1", TargetState::ForceDownload)];
        let plan = plan_targets(&existing, &ReleaseId::new("r2"));
        assert!(plan.downgrade.is_empty());
        assert!(plan.insert);
    }

    #[test]
    fn abandoned_title_is_not_reoffered() {
        let existing = vec![
            target("r1", TargetState::Delete),
            target("r2", TargetState::Delete),
        ];
        let plan = plan_targets(&existing, &ReleaseId::new("r3"));
        assert!(plan.downgrade.is_empty());
        assert!(!plan.insert);
    }

    #[test]
    fn already_offered_release_is_not_duplicated() {
        let existing = vec![
            target("r1", TargetState::Download),
            target("r2", TargetState::Download),
        ];
        let plan = plan_targets(&existing, &ReleaseId::new("r2"));
        // The other download row is still superseded.
        assert_eq!(plan.downgrade, vec![ReleaseId::new("r1")]);
        assert!(!plan.insert);
    }

    #[test]
    fn at_most_one_active_row_after_applying_plan() {
        let mut existing = vec![
            target("r1", TargetState::Download),
            target("r2", TargetState::Download),
            target("r3", TargetState::Delete),
        ];
        let new_release = ReleaseId::new("r4");
        let plan = plan_targets(&existing, &new_release);
        for id in &plan.downgrade {
            let row = existing.iter_mut().find(|t| t.release_id == *id).unwrap();
            row.target_state = TargetState::Delete;
        }
        if plan.insert {
            existing.push(target("r4", TargetState::Download));
        }
        let active = existing
            .iter()
            .filter(|t| t.target_state.wants_download())
            .count();
        assert_eq!(active, 1);
    }
}
