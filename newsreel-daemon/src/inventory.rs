//! On-disk inventory of completed downloads, stored as `db.json` inside
//! the NZBGet destination directory.
//!
//! The inventory is the daemon's memory of what it already fetched. It
//! is rewritten atomically on every change; entries whose path vanished
//! from disk (the user moved or deleted the files) are pruned at the
//! start of each cycle so the next cycle re-fetches nothing by mistake.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use newsreel_model::ReleaseId;

pub const INVENTORY_FILE: &str = "db.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Final destination path reported by the download tool.
    pub path: PathBuf,
    /// NZBGet queue number, kept so history cleanup can target the
    /// right entry long after the download finished.
    pub queue_number: i64,
}

/// Release id to completed-download mapping.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    entries: BTreeMap<String, InventoryEntry>,
}

impl Inventory {
    /// Load the inventory file, treating a missing file as empty.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt inventory file {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => {
                Err(err).with_context(|| format!("reading inventory file {}", path.display()))
            }
        }
    }

    /// Rewrite the inventory file. Written to a sibling temp file first
    /// so a crash mid-write never leaves a truncated inventory behind.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("encoding inventory")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("writing inventory file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing inventory file {}", path.display()))?;
        Ok(())
    }

    /// Drop entries whose path no longer exists on disk. Returns the
    /// release ids that were pruned.
    pub async fn prune_missing(&mut self) -> Vec<ReleaseId> {
        let mut pruned = Vec::new();
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            let exists = tokio::fs::try_exists(&self.entries[&id].path)
                .await
                .unwrap_or(false);
            if !exists {
                self.entries.remove(&id);
                pruned.push(ReleaseId::new(id));
            }
        }
        pruned
    }

    pub fn contains(&self, release_id: &ReleaseId) -> bool {
        self.entries.contains_key(release_id.as_str())
    }

    pub fn insert(&mut self, release_id: &ReleaseId, entry: InventoryEntry) {
        self.entries.insert(release_id.as_str().to_string(), entry);
    }

    pub fn remove(&mut self, release_id: &ReleaseId) -> Option<InventoryEntry> {
        self.entries.remove(release_id.as_str())
    }

    pub fn release_ids(&self) -> impl Iterator<Item = ReleaseId> + '_ {
        self.entries.keys().map(|id| ReleaseId::new(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &Path) -> InventoryEntry {
        InventoryEntry {
            path: path.to_path_buf(),
            queue_number: 7,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = Inventory::load(&dir.path().join(INVENTORY_FILE))
            .await
            .unwrap();
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(INVENTORY_FILE);
        let id = ReleaseId::new("rel-1");

        let mut inventory = Inventory::default();
        inventory.insert(&id, entry(&dir.path().join("movie")));
        inventory.save(&file).await.unwrap();

        let loaded = Inventory::load(&file).await.unwrap();
        assert_eq!(loaded, inventory);
        assert!(loaded.contains(&id));
    }

    #[tokio::test]
    async fn prune_drops_entries_without_a_backing_path() {
        let dir = tempfile::tempdir().unwrap();
        let kept_path = dir.path().join("kept");
        tokio::fs::create_dir(&kept_path).await.unwrap();

        let mut inventory = Inventory::default();
        inventory.insert(&ReleaseId::new("kept"), entry(&kept_path));
        inventory.insert(&ReleaseId::new("gone"), entry(&dir.path().join("gone")));

        let pruned = inventory.prune_missing().await;
        assert_eq!(pruned, vec![ReleaseId::new("gone")]);
        assert_eq!(inventory.len(), 1);
        assert!(inventory.contains(&ReleaseId::new("kept")));
    }
}
