//! `SQLite`-backed key-value store.
//!
//! Values are stored as JSON text in the `kv_entries` table. Each `set`,
//! `remove` and `clear` runs in one transaction so a write is never half
//! applied, and the per-key diff is computed inside that transaction.

use crate::changes::{ChangeNotifier, StoreChange, StoreChanges, Subscription};
use crate::connection::StorePool;
use crate::error::{Result, StoreError};
use crate::kv::{KeyValueStore, Record};
use crate::migrations;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use std::path::Path;

/// Durable key-value store on top of `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: StorePool,
    notifier: ChangeNotifier,
}

impl SqliteStore {
    /// Open the database at `path` (or `:memory:`) and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pool = StorePool::new(path).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations.
    pub async fn from_pool(pool: StorePool) -> Result<Self> {
        migrations::run_migrations(pool.pool()).await?;
        Ok(Self {
            pool,
            notifier: ChangeNotifier::new(),
        })
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    /// Close the store.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn read(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|(text,)| decode(key, &text)).transpose()
    }
}

fn decode(key: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| StoreError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<Record> {
        let mut record = Record::new();
        for key in keys {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM kv_entries WHERE key = ?")
                    .bind(*key)
                    .fetch_optional(self.pool.pool())
                    .await?;
            if let Some((text,)) = row {
                record.insert((*key).to_string(), decode(key, &text)?);
            }
        }
        Ok(record)
    }

    async fn set(&self, record: Record) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;
        let mut changes = Vec::new();

        for (key, value) in record {
            let old = Self::read(&mut tx, &key).await?;
            if old.as_ref() == Some(&value) {
                continue;
            }

            sqlx::query(
                r"
                INSERT INTO kv_entries (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = datetime('now')
                ",
            )
            .bind(&key)
            .bind(serde_json::to_string(&value)?)
            .execute(&mut *tx)
            .await?;

            changes.extend(StoreChange::between(&key, old, Some(value)));
        }

        tx.commit().await?;
        self.notifier.publish(StoreChanges { changes });
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;
        let mut changes = Vec::new();

        for key in keys {
            let old = Self::read(&mut tx, key).await?;
            if old.is_none() {
                continue;
            }
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(*key)
                .execute(&mut *tx)
                .await?;
            changes.extend(StoreChange::between(key, old, None));
        }

        tx.commit().await?;
        self.notifier.publish(StoreChanges { changes });
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // GLOB is case-sensitive, unlike LIKE
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv_entries WHERE key GLOB ? ORDER BY key")
            .bind(glob_prefix(prefix))
            .fetch_all(self.pool.pool())
            .await?;
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;

        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM kv_entries")
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kv_entries")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let changes = rows
            .into_iter()
            .filter_map(|(key, text)| {
                let old = decode(&key, &text).ok();
                StoreChange::between(&key, old, None)
            })
            .collect();
        self.notifier.publish(StoreChanges { changes });
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }
}

/// GLOB pattern matching keys that start with `prefix` literally.
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        match c {
            '*' | '?' | '[' => {
                pattern.push('[');
                pattern.push(c);
                pattern.push(']');
            }
            _ => pattern.push(c),
        }
    }
    pattern.push('*');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_store() -> SqliteStore {
        SqliteStore::open(":memory:").await.expect("open store")
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = create_test_store().await;

        store
            .set(json!({"ids": ["123456789012"], "exportedIds": []}).as_object().cloned().expect("object"))
            .await
            .expect("set");

        let got = store.get(&["ids", "exportedIds", "missing"]).await.expect("get");
        assert_eq!(got.get("ids"), Some(&json!(["123456789012"])));
        assert_eq!(got.get("exportedIds"), Some(&json!([])));
        assert!(!got.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_set_merges_and_notifies() {
        let store = create_test_store().await;
        let mut changes = store.subscribe();

        store.set_one("ids", json!(["a"])).await.expect("set ids");
        store.set_one("asins", json!(["B"])).await.expect("set asins");
        store.set_one("ids", json!(["a"])).await.expect("set same");

        assert_eq!(store.get_one("ids").await.expect("get"), Some(json!(["a"])));
        assert_eq!(store.get_one("asins").await.expect("get"), Some(json!(["B"])));

        let first = changes.recv().await.expect("first batch");
        assert!(first.touches("ids"));
        let second = changes.recv().await.expect("second batch");
        assert!(second.touches("asins"));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = create_test_store().await;
        store.set_one("task:1", json!({"currentIndex": 1})).await.expect("set");
        store.set_one("task:2", json!({"currentIndex": 2})).await.expect("set");
        store.set_one("ids", json!([])).await.expect("set");

        assert_eq!(
            store.keys_with_prefix("task:").await.expect("scan"),
            vec!["task:1".to_string(), "task:2".to_string()]
        );

        store.remove(&["task:1", "task:missing"]).await.expect("remove");
        assert_eq!(store.get_one("task:1").await.expect("get"), None);

        let mut changes = store.subscribe();
        store.clear().await.expect("clear");
        let batch = changes.recv().await.expect("clear batch");
        assert_eq!(batch.changes.len(), 2);
        assert!(store.keys_with_prefix("").await.expect("scan").is_empty());
    }

    #[tokio::test]
    async fn test_prefix_scan_is_literal() {
        let store = create_test_store().await;
        for key in ["task:1", "Task:2", "task*x", "taskA", "t[a]sk:3", "task?"] {
            store.set_one(key, json!(1)).await.expect("set");
        }

        let scan = |prefix: &'static str| {
            let store = &store;
            async move { store.keys_with_prefix(prefix).await.expect("scan") }
        };
        assert_eq!(scan("task:").await, vec!["task:1".to_string()]);
        assert_eq!(scan("task*").await, vec!["task*x".to_string()]);
        assert_eq!(scan("task?").await, vec!["task?".to_string()]);
        assert_eq!(scan("t[a]").await, vec!["t[a]sk:3".to_string()]);
        assert_eq!(scan("").await.len(), 6);
    }

    #[test]
    fn test_glob_prefix_escapes_wildcards() {
        assert_eq!(glob_prefix("task:"), "task:*");
        assert_eq!(glob_prefix("a*b?[c]"), "a[*]b[?][[]c]*");
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let path = tmp.path().join("harvest.db");

        let store = SqliteStore::open(&path).await.expect("open store");
        store.set_one("ids", json!(["123456789012"])).await.expect("set");
        store.close().await;

        let reopened = SqliteStore::open(&path).await.expect("reopen store");
        assert_eq!(
            reopened.get_one("ids").await.expect("get"),
            Some(json!(["123456789012"]))
        );
    }
}
