//! Storage abstractions for snapshots and the site registry.
//!
//! ## Directory Structure
//!
//! ```text
//! monitor_data/
//! └── sites/
//!     └── {site-key}/
//!         ├── snapshot.json     # Last-known normalized content
//!         ├── status.json       # Runtime status (failures, last check)
//!         ├── last_diff.json    # Most recent change report
//!         └── diff.html         # Rendered form of last_diff.json
//! ```

pub mod config_store;
pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SiteKey, SiteStatus, Snapshot};
use crate::pipeline::ChangeReport;

// Re-export for convenience
pub use config_store::{ConfigStore, TomlConfigStore};
pub use local::LocalSnapshotStore;
pub use memory::MemorySnapshotStore;

/// Per-site persistence of snapshots and their metadata.
///
/// Every write is all-or-nothing: a reader sees either the previous value or
/// the new one, never a partial write.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Current snapshot for a site, if one was stored.
    async fn get(&self, key: &SiteKey) -> Result<Option<Snapshot>>;

    /// Store a snapshot as the site's current one.
    ///
    /// The store assigns the sequence number (previous + 1, starting at 1)
    /// and returns the snapshot as stored. Capture times never go backwards.
    async fn put(&self, key: &SiteKey, snapshot: Snapshot) -> Result<Snapshot>;

    /// Forget everything stored for a site.
    async fn remove(&self, key: &SiteKey) -> Result<()>;

    async fn last_diff(&self, key: &SiteKey) -> Result<Option<ChangeReport>>;

    async fn put_last_diff(&self, key: &SiteKey, report: &ChangeReport) -> Result<()>;

    async fn status(&self, key: &SiteKey) -> Result<Option<SiteStatus>>;

    async fn put_status(&self, key: &SiteKey, status: &SiteStatus) -> Result<()>;
}

/// Apply the store's sequencing rules to a snapshot about to replace `previous`.
pub(crate) fn sequence_after(previous: Option<&Snapshot>, mut snapshot: Snapshot) -> Snapshot {
    match previous {
        Some(prev) => {
            snapshot.sequence = prev.sequence + 1;
            snapshot.captured_at = snapshot.captured_at.max(prev.captured_at);
        }
        None => snapshot.sequence = 1,
    }
    snapshot
}
