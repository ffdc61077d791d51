//! In-process key-value store.

use crate::changes::{ChangeNotifier, StoreChange, StoreChanges, Subscription};
use crate::error::Result;
use crate::kv::{KeyValueStore, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Key-value store held in memory. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            notifier: ChangeNotifier::new(),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> Vec<StoreChange>) {
        let changes = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut entries)
        };
        self.notifier.publish(StoreChanges { changes });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Record> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| ((*k).to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, record: Record) -> Result<()> {
        self.mutate(|entries| {
            record
                .into_iter()
                .filter_map(|(key, value)| {
                    let old = entries.insert(key.clone(), value.clone());
                    StoreChange::between(&key, old, Some(value))
                })
                .collect()
        });
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.mutate(|entries| {
            keys.iter()
                .filter_map(|key| StoreChange::between(key, entries.remove(*key), None))
                .collect()
        });
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(|entries| {
            std::mem::take(entries)
                .into_iter()
                .filter_map(|(key, old)| StoreChange::between(&key, Some(old), None))
                .collect()
        });
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }
}
