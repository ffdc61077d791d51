//! The key-value store contract.

use crate::changes::Subscription;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A partial record: top-level keys mapped to JSON values.
pub type Record = Map<String, Value>;

/// Durable key-value storage shared by every component.
///
/// `set` merges at the top level: keys absent from the record are left
/// untouched. Implementations serialize individual calls; a read followed by
/// a write is not atomic, so callers appending to shared sets must read
/// immediately before writing and merge with set union.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the given keys. Missing keys are absent from the result.
    async fn get(&self, keys: &[&str]) -> Result<Record>;

    /// Merge `record` into the store.
    async fn set(&self, record: Record) -> Result<()>;

    /// Delete the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every key.
    async fn clear(&self) -> Result<()>;

    /// Subscribe to per-key diffs of every subsequent write.
    fn subscribe(&self) -> Subscription;

    /// Fetch a single key.
    async fn get_one(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(&[key]).await?.remove(key))
    }

    /// Write a single key.
    async fn set_one(&self, key: &str, value: Value) -> Result<()> {
        let mut record = Record::new();
        record.insert(key.to_string(), value);
        self.set(record).await
    }
}
