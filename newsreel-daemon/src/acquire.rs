//! Acquisition loop: reconciles the account's desired releases against
//! the local disk by driving NZBGet.
//!
//! Every cycle diffs three sets: what is on disk (the inventory), what
//! the store says the account wants, and what this process is already
//! downloading. Extra local content is deleted; wanted-but-missing
//! content is started under a download lease so two daemons never fetch
//! the same release twice.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use newsreel_core::indexer::IndexerClient;
use newsreel_core::nzbget::NzbgetClient;
use newsreel_core::store::PostgresStore;
use newsreel_model::{AccountId, ReleaseId, TargetState};

use crate::inventory::{Inventory, InventoryEntry, INVENTORY_FILE};

/// Lease TTL. Long enough to cover any realistic download; a crashed
/// daemon's leases expire and the release becomes startable again.
const LEASE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Consecutive status-poll failures tolerated before a download task
/// gives up and releases its lease.
const MAX_POLL_FAILURES: u32 = 5;

/// What one cycle decided to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CyclePlan {
    /// On disk but no longer wanted.
    pub to_delete: Vec<ReleaseId>,
    /// Wanted, not on disk, and not already being fetched.
    pub to_start: Vec<ReleaseId>,
}

pub fn plan_cycle(
    local: &BTreeSet<ReleaseId>,
    desired: &BTreeSet<ReleaseId>,
    in_flight: &HashSet<ReleaseId>,
) -> CyclePlan {
    CyclePlan {
        to_delete: local.difference(desired).cloned().collect(),
        to_start: desired
            .difference(local)
            .filter(|id| !in_flight.contains(id))
            .cloned()
            .collect(),
    }
}

#[derive(Debug)]
pub struct AcquireDaemon {
    store: PostgresStore,
    indexer: IndexerClient,
    nzbget: NzbgetClient,
    account_id: AccountId,
    poll_interval: Duration,
    cycle_interval: Duration,
    /// Fast-path duplicate guard within this process; the persisted
    /// lease covers other processes.
    in_flight: Mutex<HashSet<ReleaseId>>,
    /// Serializes load-modify-save of the inventory file between the
    /// cycle loop and the per-download tasks.
    inventory_lock: Mutex<()>,
}

impl AcquireDaemon {
    pub fn new(
        store: PostgresStore,
        indexer: IndexerClient,
        nzbget: NzbgetClient,
        account_id: AccountId,
        poll_interval: Duration,
        cycle_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            indexer,
            nzbget,
            account_id,
            poll_interval,
            cycle_interval,
            in_flight: Mutex::new(HashSet::new()),
            inventory_lock: Mutex::new(()),
        })
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let config = self
            .nzbget
            .config()
            .await
            .context("reading download tool config")?;
        let inventory_path = Path::new(&config.dest_dir).join(INVENTORY_FILE);
        info!(dest_dir = %config.dest_dir, account = %self.account_id, "acquisition daemon started");

        loop {
            if let Err(err) = self.clone().cycle(&inventory_path).await {
                error!(error = %err, "acquisition cycle failed");
            }
            tokio::time::sleep(self.cycle_interval).await;
        }
    }

    async fn cycle(self: Arc<Self>, inventory_path: &Path) -> anyhow::Result<()> {
        let local: BTreeSet<ReleaseId> = {
            let _guard = self.inventory_lock.lock().await;
            let mut inventory = Inventory::load(inventory_path).await?;
            let pruned = inventory.prune_missing().await;
            if !pruned.is_empty() {
                warn!(count = pruned.len(), "pruned inventory entries whose files vanished");
                inventory.save(inventory_path).await?;
            }
            inventory.release_ids().collect()
        };

        let mut desired = self
            .store
            .targets_by_state(&self.account_id, TargetState::Download)
            .await?;
        desired.extend(
            self.store
                .targets_by_state(&self.account_id, TargetState::ForceDownload)
                .await?,
        );
        let desired: BTreeSet<ReleaseId> =
            desired.into_iter().map(|t| t.release_id).collect();

        let in_flight = self.in_flight.lock().await.clone();
        let plan = plan_cycle(&local, &desired, &in_flight);

        for release_id in &plan.to_delete {
            if let Err(err) = self.delete_local(inventory_path, release_id).await {
                error!(release = %release_id, error = %err, "local delete failed");
            }
        }
        for release_id in plan.to_start {
            if let Err(err) = self
                .clone()
                .start_download(inventory_path, release_id.clone())
                .await
            {
                error!(release = %release_id, error = %err, "download start failed");
            }
        }
        Ok(())
    }

    /// Remove a release the account no longer wants: files first, then
    /// the NZBGet history entry, then the inventory row, then the
    /// remote download status.
    async fn delete_local(&self, inventory_path: &Path, release_id: &ReleaseId) -> anyhow::Result<()> {
        let _guard = self.inventory_lock.lock().await;
        let mut inventory = Inventory::load(inventory_path).await?;
        let Some(entry) = inventory.remove(release_id) else {
            return Ok(());
        };
        info!(release = %release_id, path = %entry.path.display(), "deleting local release");

        remove_path(&entry.path)
            .await
            .with_context(|| format!("removing {}", entry.path.display()))?;
        if let Err(err) = self.nzbget.delete_history_entry(entry.queue_number).await {
            // Not fatal, the entry may already be gone from history.
            warn!(release = %release_id, error = %err, "history cleanup failed");
        }
        inventory.save(inventory_path).await?;
        self.store
            .set_download_status(&self.account_id, release_id, None)
            .await?;
        Ok(())
    }

    async fn start_download(
        self: Arc<Self>,
        inventory_path: &Path,
        release_id: ReleaseId,
    ) -> anyhow::Result<()> {
        let claimed = self
            .store
            .acquire_download_lease(&self.account_id, &release_id, LEASE_TTL)
            .await?;
        if !claimed {
            info!(release = %release_id, "lease held by another process, skipping");
            return Ok(());
        }
        self.in_flight.lock().await.insert(release_id.clone());

        let daemon = Arc::clone(&self);
        let inventory_path = inventory_path.to_path_buf();
        tokio::spawn(async move {
            if let Err(err) = daemon.download(&inventory_path, &release_id).await {
                error!(release = %release_id, error = %err, "download task failed");
            }
            daemon.in_flight.lock().await.remove(&release_id);
            if let Err(err) = daemon
                .store
                .release_download_lease(&daemon.account_id, &release_id)
                .await
            {
                error!(release = %release_id, error = %err, "lease release failed");
            }
        });
        Ok(())
    }

    /// One download from append to terminal state, polling NZBGet on a
    /// fixed interval and persisting every observed status in order.
    async fn download(&self, inventory_path: &Path, release_id: &ReleaseId) -> anyhow::Result<()> {
        let content_url = self.indexer.manifest_url(release_id);
        let queue_number = self
            .nzbget
            .append(release_id, &content_url)
            .await
            .context("queueing download")?;
        info!(release = %release_id, queue_number, "download queued");

        let mut poll_failures = 0u32;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let status = match self.nzbget.download_status(queue_number).await {
                Ok(status) => {
                    poll_failures = 0;
                    status
                }
                Err(err) => {
                    poll_failures += 1;
                    if poll_failures >= MAX_POLL_FAILURES {
                        return Err(err).context("polling download status");
                    }
                    warn!(release = %release_id, error = %err, "status poll failed, retrying");
                    continue;
                }
            };

            self.store
                .set_download_status(&self.account_id, release_id, Some(&status))
                .await?;
            match self.nzbget.server_status().await {
                Ok(server) => {
                    self.store
                        .set_tool_status(&self.account_id, server.download_rate)
                        .await?;
                }
                Err(err) => warn!(error = %err, "server status unavailable"),
            }

            if !status.in_queue {
                info!(release = %release_id, status = %status.status,
                      path = %status.path, "download finished");
                let _guard = self.inventory_lock.lock().await;
                let mut inventory = Inventory::load(inventory_path).await?;
                inventory.insert(
                    release_id,
                    InventoryEntry {
                        path: PathBuf::from(&status.path),
                        queue_number,
                    },
                );
                inventory.save(inventory_path).await?;
                return Ok(());
            }
        }
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> BTreeSet<ReleaseId> {
        raw.iter().map(|id| ReleaseId::new(*id)).collect()
    }

    #[test]
    fn superseded_release_is_replaced() {
        let plan = plan_cycle(&ids(&["r2"]), &ids(&["r1"]), &HashSet::new());
        assert_eq!(plan.to_delete, vec![ReleaseId::new("r2")]);
        assert_eq!(plan.to_start, vec![ReleaseId::new("r1")]);
    }

    #[test]
    fn in_flight_releases_are_not_restarted() {
        let in_flight: HashSet<ReleaseId> = [ReleaseId::new("r1")].into();
        let plan = plan_cycle(&ids(&[]), &ids(&["r1", "r3"]), &in_flight);
        assert_eq!(plan.to_start, vec![ReleaseId::new("r3")]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn settled_state_plans_nothing() {
        let plan = plan_cycle(&ids(&["r1", "r2"]), &ids(&["r1", "r2"]), &HashSet::new());
        assert_eq!(plan, CyclePlan::default());
    }

    #[tokio::test]
    async fn remove_path_ignores_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        remove_path(&dir.path().join("never-existed")).await.unwrap();
    }
}
