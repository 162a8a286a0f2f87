//! Normalized content captured from a site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::content_hash;

/// The last-known normalized content of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Normalized text, one line per block of the page
    pub content: String,

    /// SHA-256 of `content`, hex encoded
    pub hash: String,

    /// When the content was captured
    pub captured_at: DateTime<Utc>,

    /// Per-site sequence number, assigned by the store on `put`
    #[serde(default)]
    pub sequence: u64,
}

impl Snapshot {
    /// Capture normalized content. The sequence stays 0 until stored.
    pub fn capture(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            hash: content_hash(&content),
            content,
            captured_at: Utc::now(),
            sequence: 0,
        }
    }

    /// Whether `other` carries the same content, by hash.
    pub fn same_content(&self, hash: &str) -> bool {
        self.hash == hash
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Snapshot::capture("Price: $10");
        let b = Snapshot::capture("Price: $10");
        assert_eq!(a.hash, b.hash);
        assert!(a.same_content(&b.hash));
        assert_ne!(a.hash, Snapshot::capture("Price: $12").hash);
    }

    #[test]
    fn test_unstored_sequence_is_zero() {
        assert_eq!(Snapshot::capture("x").sequence, 0);
    }
}
