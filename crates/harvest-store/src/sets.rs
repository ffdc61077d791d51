//! Collected Set bookkeeping.
//!
//! Sets are persisted as JSON arrays in first-insertion order. Every append
//! reads the current array right before writing it back and merges by set
//! union, so additions made by another writer in between are kept.

use crate::error::{Result, StoreError};
use crate::kv::{KeyValueStore, Record};
use harvest_core::{Identifier, Timestamp};
use harvest_site::StorageKeys;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Outcome of merging identifiers into the Collected Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Identifiers that were not collected before
    pub added: usize,
    /// Size of the Collected Set afterwards
    pub total: usize,
}

/// Collection and export timestamps shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionStats {
    /// When identifiers were last merged
    pub last_collect_time: Option<Timestamp>,
    /// How many were new in that merge
    pub last_collect_count: usize,
    /// When identifiers were last marked exported
    pub last_export_time: Option<Timestamp>,
    /// How many were newly marked in that export
    pub last_export_count: usize,
}

/// Read-modify-write access to one site's identifier sets.
#[derive(Clone)]
pub struct IdentifierSets {
    store: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl IdentifierSets {
    /// Bind to the keys of one site.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self { store, keys }
    }

    /// The keys in use.
    #[must_use]
    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub(crate) fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The Collected Set in insertion order.
    pub async fn collected(&self) -> Result<Vec<Identifier>> {
        self.read_list(&self.keys.ids_key).await
    }

    /// The Exported Set in insertion order.
    pub async fn exported(&self) -> Result<Vec<Identifier>> {
        self.read_list(&self.keys.exported_key).await
    }

    /// Stored stats, or defaults when none were written yet.
    pub async fn stats(&self) -> Result<CollectionStats> {
        Ok(self
            .read_value(&self.keys.stats_key)
            .await?
            .unwrap_or_default())
    }

    /// Union `ids` into the Collected Set.
    ///
    /// Order of first appearance is kept; duplicates inside `ids` collapse.
    pub async fn append_unique(&self, ids: &[Identifier]) -> Result<MergeReport> {
        let mut collected = self.collected().await?;
        let mut seen: HashSet<Identifier> = collected.iter().cloned().collect();
        let before = collected.len();

        for id in ids {
            if seen.insert(id.clone()) {
                collected.push(id.clone());
            }
        }

        let report = MergeReport {
            added: collected.len() - before,
            total: collected.len(),
        };

        let mut stats = self.stats().await?;
        stats.last_collect_time = Some(Timestamp::now());
        stats.last_collect_count = report.added;

        let mut record = Record::new();
        record.insert(self.keys.ids_key.clone(), serde_json::to_value(&collected)?);
        record.insert(self.keys.stats_key.clone(), serde_json::to_value(&stats)?);
        self.store.set(record).await?;

        debug!(added = report.added, total = report.total, key = %self.keys.ids_key, "merged identifiers");
        Ok(report)
    }

    pub(crate) async fn read_list(&self, key: &str) -> Result<Vec<Identifier>> {
        Ok(self.read_value(key).await?.unwrap_or_default())
    }

    async fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_one(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Decode {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}
