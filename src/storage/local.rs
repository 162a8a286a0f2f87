//! Local filesystem snapshot store.
//!
//! Every file is written to a uniquely named temporary sibling, synced, and
//! renamed into place, so readers only ever see complete files. Writes for
//! one site are serialized by a per-key lock; other sites proceed freely.
//!
//! The last assigned sequence is also kept in its own small file, written
//! before the snapshot. A snapshot that can no longer be parsed is then
//! simply replaced by the next `put` without reusing a sequence number.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{SiteKey, SiteStatus, Snapshot};
use crate::pipeline::ChangeReport;
use crate::storage::{SnapshotStore, sequence_after};
use crate::utils::keyed_lock::KeyedLocks;

const SNAPSHOT_FILE: &str = "snapshot.json";
const STATUS_FILE: &str = "status.json";
const LAST_DIFF_FILE: &str = "last_diff.json";
const DIFF_HTML_FILE: &str = "diff.html";
const SEQUENCE_FILE: &str = "sequence";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
#[derive(Debug)]
pub struct LocalSnapshotStore {
    root_dir: PathBuf,
    locks: KeyedLocks<SiteKey>,
}

impl LocalSnapshotStore {
    /// Create a new store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            locks: KeyedLocks::new(),
        }
    }

    /// Directory holding one site's files.
    fn site_dir(&self, key: &SiteKey) -> PathBuf {
        self.root_dir.join("sites").join(key.as_str())
    }

    fn path(&self, key: &SiteKey, file: &str) -> PathBuf {
        self.site_dir(key).join(file)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &SiteKey, file: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key, file);
        let store_err = |e: std::io::Error| AppError::store(key.as_str(), format!("{file}: {e}"));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }

        let tmp = path.with_file_name(format!(
            ".{file}.{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = async {
            let mut out = tokio::fs::File::create(&tmp).await?;
            out.write_all(bytes).await?;
            out.flush().await?;
            out.sync_all().await?;
            drop(out);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(store_err(e));
        }
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &SiteKey,
        file: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| AppError::store(key.as_str(), format!("{file}: {e}")))?;
        self.write_bytes(key, file, &bytes).await
    }

    /// Read JSON data, returning None if the file doesn't exist.
    async fn read_json<T: DeserializeOwned>(&self, key: &SiteKey, file: &str) -> Result<Option<T>> {
        let path = self.path(key, file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::store(key.as_str(), format!("{file}: {e}"))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::store(key.as_str(), format!("{file} is corrupt: {e}")))
    }

    /// Last sequence handed out for a site, if it can be read.
    async fn last_sequence(&self, key: &SiteKey) -> Option<u64> {
        let path = self.path(key, SEQUENCE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match text.trim().parse() {
                Ok(sequence) => Some(sequence),
                Err(e) => {
                    log::warn!("{key}: ignoring unreadable {SEQUENCE_FILE} file: {e}");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("{key}: cannot read {SEQUENCE_FILE} file: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn get(&self, key: &SiteKey) -> Result<Option<Snapshot>> {
        self.read_json(key, SNAPSHOT_FILE).await
    }

    async fn put(&self, key: &SiteKey, snapshot: Snapshot) -> Result<Snapshot> {
        let _guard = self.locks.lock(key).await;

        let previous: Option<Snapshot> = match self.read_json(key, SNAPSHOT_FILE).await {
            Ok(previous) => previous,
            Err(e) => {
                log::warn!("{key}: replacing unreadable snapshot: {e}");
                None
            }
        };

        let mut stored = sequence_after(previous.as_ref(), snapshot);
        if let Some(last) = self.last_sequence(key).await {
            stored.sequence = stored.sequence.max(last + 1);
        }

        self.write_bytes(key, SEQUENCE_FILE, stored.sequence.to_string().as_bytes())
            .await?;
        self.write_json(key, SNAPSHOT_FILE, &stored).await?;

        log::debug!("Stored snapshot #{} for {}", stored.sequence, key);
        Ok(stored)
    }

    async fn remove(&self, key: &SiteKey) -> Result<()> {
        let _guard = self.locks.lock(key).await;

        match tokio::fs::remove_dir_all(self.site_dir(key)).await {
            Ok(()) => {
                log::info!("Removed stored data for {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::store(key.as_str(), e)),
        }
    }

    async fn last_diff(&self, key: &SiteKey) -> Result<Option<ChangeReport>> {
        self.read_json(key, LAST_DIFF_FILE).await
    }

    async fn put_last_diff(&self, key: &SiteKey, report: &ChangeReport) -> Result<()> {
        let _guard = self.locks.lock(key).await;

        self.write_json(key, LAST_DIFF_FILE, report).await?;
        self.write_bytes(key, DIFF_HTML_FILE, report.to_html().as_bytes())
            .await
    }

    async fn status(&self, key: &SiteKey) -> Result<Option<SiteStatus>> {
        self.read_json(key, STATUS_FILE).await
    }

    async fn put_status(&self, key: &SiteKey, status: &SiteStatus) -> Result<()> {
        let _guard = self.locks.lock(key).await;
        self.write_json(key, STATUS_FILE, status).await
    }
}
