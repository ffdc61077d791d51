//! Persisted progress of a multi-page run.

use crate::error::Result;
use harvest_core::{Identifier, SiteId, TaskId, Timestamp};
use harvest_site::definition::TASK_KEY_PREFIX;
use harvest_store::{KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress record for an in-flight collection run.
///
/// `current_index` counts completed pages, so the page the run is on (or is
/// about to reach) is `start_page + current_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTask {
    /// Task identifier
    pub id: TaskId,
    /// Site being collected
    pub site: SiteId,
    /// Page the run started on
    pub start_page: u32,
    /// Pages requested
    pub target_page_count: u32,
    /// Pages completed so far
    pub current_index: u32,
    /// Identifiers accumulated so far, first-seen order
    pub collected_ids: Vec<Identifier>,
    /// When the run started
    pub created_at: Timestamp,
    /// Last progress write
    pub updated_at: Timestamp,
}

impl CollectionTask {
    /// Fresh task with nothing completed.
    #[must_use]
    pub fn new(site: SiteId, start_page: u32, target_page_count: u32) -> Self {
        let now = Timestamp::now();
        Self {
            id: TaskId::generate(),
            site,
            start_page,
            target_page_count,
            current_index: 0,
            collected_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Store key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{TASK_KEY_PREFIX}{}", self.id)
    }

    /// Page the run should be on next.
    #[must_use]
    pub fn expected_page(&self) -> u32 {
        self.start_page.saturating_add(self.current_index)
    }

    /// Whether every requested page was processed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_index >= self.target_page_count
    }

    /// Union `ids` into the accumulated set. Returns how many were new.
    pub fn absorb(&mut self, ids: Vec<Identifier>) -> usize {
        let mut seen: HashSet<Identifier> = self.collected_ids.iter().cloned().collect();
        let before = self.collected_ids.len();
        for id in ids {
            if seen.insert(id.clone()) {
                self.collected_ids.push(id);
            }
        }
        self.collected_ids.len() - before
    }

    /// Record that page number `index` (1-based within the run) is done.
    pub fn complete_page(&mut self, index: u32) {
        self.current_index = index;
        self.updated_at = Timestamp::now();
    }
}

/// Task records in the shared store.
#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn KeyValueStore>,
}

impl TaskStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write the record.
    pub async fn save(&self, task: &CollectionTask) -> Result<()> {
        let value = serde_json::to_value(task).map_err(StoreError::from)?;
        self.store.set_one(&task.key(), value).await?;
        debug!(task_id = %task.id, index = task.current_index, "task saved");
        Ok(())
    }

    /// Delete the record.
    pub async fn delete(&self, task: &CollectionTask) -> Result<()> {
        self.store.remove(&[task.key().as_str()]).await?;
        debug!(task_id = %task.id, "task deleted");
        Ok(())
    }

    /// Every readable task record for `site`, oldest first.
    ///
    /// Records that no longer decode are removed.
    pub async fn for_site(&self, site: &SiteId) -> Result<Vec<CollectionTask>> {
        let keys = self.store.keys_with_prefix(TASK_KEY_PREFIX).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let records = self.store.get(&key_refs).await?;

        let mut tasks = Vec::new();
        let mut broken = Vec::new();
        for (key, value) in records {
            match serde_json::from_value::<CollectionTask>(value) {
                Ok(task) if &task.site == site => tasks.push(task),
                Ok(_) => {}
                Err(e) => {
                    warn!(%key, error = %e, "discarding unreadable task record");
                    broken.push(key);
                }
            }
        }

        if !broken.is_empty() {
            let broken: Vec<&str> = broken.iter().map(String::as_str).collect();
            self.store.remove(&broken).await?;
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// The orphaned record to resume for `site`, if any.
    ///
    /// Only the newest record is kept. Identifiers held by older records are
    /// folded into it before those records are deleted.
    pub async fn take_orphan(&self, site: &SiteId) -> Result<Option<CollectionTask>> {
        let mut tasks = self.for_site(site).await?;
        let Some(mut newest) = tasks.pop() else {
            return Ok(None);
        };
        if tasks.is_empty() {
            return Ok(Some(newest));
        }

        for stale in &tasks {
            newest.absorb(stale.collected_ids.clone());
        }
        self.save(&newest).await?;
        for stale in &tasks {
            warn!(task_id = %stale.id, into = %newest.id, "merged stale task record");
            self.delete(stale).await?;
        }
        Ok(Some(newest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_store::MemoryStore;
    use serde_json::json;

    fn site() -> SiteId {
        SiteId::new("1688").unwrap()
    }

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn test_record_shape() {
        let mut task = CollectionTask::new(site(), 2, 5);
        task.absorb(vec![id("123456789012")]);
        task.complete_page(1);

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["startPage"], 2);
        assert_eq!(value["targetPageCount"], 5);
        assert_eq!(value["currentIndex"], 1);
        assert_eq!(value["collectedIds"], json!(["123456789012"]));
        assert!(task.key().starts_with("task:"));
        assert_eq!(task.expected_page(), 3);
        assert!(!task.is_finished());
    }

    #[test]
    fn test_expected_page_saturates() {
        let mut task = CollectionTask::new(site(), u32::MAX, 3);
        task.complete_page(1);
        assert_eq!(task.expected_page(), u32::MAX);
    }

    #[test]
    fn test_absorb_is_union() {
        let mut task = CollectionTask::new(site(), 1, 2);
        assert_eq!(task.absorb(vec![id("A1"), id("B2")]), 2);
        assert_eq!(task.absorb(vec![id("B2"), id("C3"), id("A1")]), 1);
        assert_eq!(task.collected_ids, vec![id("A1"), id("B2"), id("C3")]);
    }

    #[tokio::test]
    async fn test_save_find_delete() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tasks = TaskStore::new(store.clone());

        let task = CollectionTask::new(site(), 1, 3);
        tasks.save(&task).await.unwrap();

        let other = CollectionTask::new(SiteId::new("amazon").unwrap(), 1, 3);
        tasks.save(&other).await.unwrap();

        let found = tasks.take_orphan(&site()).await.unwrap();
        assert_eq!(found, Some(task.clone()));

        tasks.delete(&task).await.unwrap();
        assert_eq!(tasks.take_orphan(&site()).await.unwrap(), None);
        assert!(tasks
            .take_orphan(&SiteId::new("amazon").unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unreadable_and_stale_records_removed() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tasks = TaskStore::new(store.clone());

        store.set_one("task:garbage", json!({"nope": true})).await.unwrap();

        let mut older = CollectionTask::new(site(), 1, 3);
        older.created_at = Timestamp::from_rfc3339("2026-01-01T00:00:00Z").unwrap();
        older.absorb(vec![id("100000000001"), id("200000000001")]);
        let mut newer = CollectionTask::new(site(), 4, 2);
        newer.created_at = Timestamp::from_rfc3339("2026-01-01T00:05:00Z").unwrap();
        newer.absorb(vec![id("200000000001"), id("300000000001")]);
        tasks.save(&older).await.unwrap();
        tasks.save(&newer).await.unwrap();

        let found = tasks.take_orphan(&site()).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        let merged = vec![id("200000000001"), id("300000000001"), id("100000000001")];
        assert_eq!(found.collected_ids, merged);

        let remaining = store.keys_with_prefix("task:").await.unwrap();
        assert_eq!(remaining, vec![newer.key()]);
        let stored = store.get_one(&newer.key()).await.unwrap().unwrap();
        assert_eq!(stored["collectedIds"], json!(merged));
    }
}
