//! In-process snapshot store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SiteKey, SiteStatus, Snapshot};
use crate::pipeline::ChangeReport;
use crate::storage::{SnapshotStore, sequence_after};

#[derive(Debug, Default)]
struct Entry {
    snapshot: Option<Snapshot>,
    status: Option<SiteStatus>,
    last_diff: Option<ChangeReport>,
}

/// Snapshot store held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<SiteKey, Entry>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SiteKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read from an existing entry without creating one.
    fn read<T>(&self, key: &SiteKey, f: impl FnOnce(&Entry) -> Option<T>) -> Option<T> {
        self.entries().get(key).and_then(f)
    }

    fn with_entry<T>(&self, key: &SiteKey, f: impl FnOnce(&mut Entry) -> T) -> T {
        f(self.entries().entry(key.clone()).or_default())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &SiteKey) -> Result<Option<Snapshot>> {
        Ok(self.read(key, |e| e.snapshot.clone()))
    }

    async fn put(&self, key: &SiteKey, snapshot: Snapshot) -> Result<Snapshot> {
        Ok(self.with_entry(key, |e| {
            let stored = sequence_after(e.snapshot.as_ref(), snapshot);
            e.snapshot = Some(stored.clone());
            stored
        }))
    }

    async fn remove(&self, key: &SiteKey) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn last_diff(&self, key: &SiteKey) -> Result<Option<ChangeReport>> {
        Ok(self.read(key, |e| e.last_diff.clone()))
    }

    async fn put_last_diff(&self, key: &SiteKey, report: &ChangeReport) -> Result<()> {
        self.with_entry(key, |e| e.last_diff = Some(report.clone()));
        Ok(())
    }

    async fn status(&self, key: &SiteKey) -> Result<Option<SiteStatus>> {
        Ok(self.read(key, |e| e.status.clone()))
    }

    async fn put_status(&self, key: &SiteKey, status: &SiteStatus) -> Result<()> {
        self.with_entry(key, |e| e.status = Some(status.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = MemorySnapshotStore::new();
        let key = SiteKey::parse("a").unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        let first = store.put(&key, Snapshot::capture("one")).await.unwrap();
        let second = store.put(&key, Snapshot::capture("two")).await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(store.get(&key).await.unwrap().unwrap().content, "two");

        store.remove(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_do_not_create_entries() {
        let store = MemorySnapshotStore::new();
        for raw in ["a", "b", "c"] {
            let key = SiteKey::parse(raw).unwrap();
            assert!(store.get(&key).await.unwrap().is_none());
            assert!(store.status(&key).await.unwrap().is_none());
            assert!(store.last_diff(&key).await.unwrap().is_none());
        }
        assert!(store.entries().is_empty());
    }
}
