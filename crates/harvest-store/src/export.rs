//! Export bookkeeping.

use crate::error::Result;
use crate::kv::{KeyValueStore, Record};
use crate::sets::{CollectionStats, IdentifierSets};
use harvest_core::{Identifier, Timestamp};
use std::collections::HashSet;
use tracing::{debug, info};

/// Tracks which collected identifiers were already delivered.
///
/// Invariant: the Exported Set only ever contains collected identifiers.
#[derive(Clone)]
pub struct ExportTracker {
    sets: IdentifierSets,
}

impl ExportTracker {
    /// Track exports for the given sets.
    #[must_use]
    pub fn new(sets: IdentifierSets) -> Self {
        Self { sets }
    }

    /// The underlying sets.
    #[must_use]
    pub fn sets(&self) -> &IdentifierSets {
        &self.sets
    }

    /// Collected minus Exported, in collected order.
    pub async fn pending(&self) -> Result<Vec<Identifier>> {
        let exported: HashSet<Identifier> = self.sets.exported().await?.into_iter().collect();
        Ok(self
            .sets
            .collected()
            .await?
            .into_iter()
            .filter(|id| !exported.contains(id))
            .collect())
    }

    /// Mark `ids` as exported. Returns how many were newly marked.
    ///
    /// Already-exported ids and ids that were never collected are ignored.
    pub async fn mark_exported(&self, ids: &[Identifier]) -> Result<usize> {
        let collected: HashSet<Identifier> = self.sets.collected().await?.into_iter().collect();
        let mut exported = self.sets.exported().await?;
        let mut seen: HashSet<Identifier> = exported.iter().cloned().collect();
        let before = exported.len();

        for id in ids {
            if collected.contains(id) && seen.insert(id.clone()) {
                exported.push(id.clone());
            }
        }

        let marked = exported.len() - before;
        if marked == 0 {
            return Ok(0);
        }

        let mut stats = self.sets.stats().await?;
        stats.last_export_time = Some(Timestamp::now());
        stats.last_export_count = marked;

        let keys = self.sets.keys();
        let mut record = Record::new();
        record.insert(keys.exported_key.clone(), serde_json::to_value(&exported)?);
        record.insert(keys.stats_key.clone(), serde_json::to_value(&stats)?);
        self.sets.store().set(record).await?;

        debug!(marked, total_exported = exported.len(), "marked identifiers exported");
        Ok(marked)
    }

    /// Mark the whole Collected Set as exported and return it.
    pub async fn mark_all_exported(&self) -> Result<Vec<Identifier>> {
        let collected = self.sets.collected().await?;
        self.mark_exported(&collected).await?;
        Ok(collected)
    }

    /// Forget every export without touching the Collected Set.
    pub async fn reset_export(&self) -> Result<()> {
        let keys = self.sets.keys();
        self.sets
            .store()
            .set_one(&keys.exported_key, serde_json::Value::Array(Vec::new()))
            .await?;
        info!(key = %keys.exported_key, "export status reset");
        Ok(())
    }

    /// Delete both sets and the stats for this site.
    pub async fn clear_all(&self) -> Result<()> {
        let keys = self.sets.keys();
        self.sets
            .store()
            .remove(&[
                keys.ids_key.as_str(),
                keys.exported_key.as_str(),
                keys.stats_key.as_str(),
            ])
            .await?;
        info!(key = %keys.ids_key, "collected identifiers cleared");
        Ok(())
    }

    /// Collection and export stats.
    pub async fn stats(&self) -> Result<CollectionStats> {
        self.sets.stats().await
    }
}
