//! Value types shared by the store, the engine and the notification layer.
//!
//! Everything handed out of a reconciliation pass is a plain snapshot; no
//! type here borrows from, or refers back into, a live store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of a SHA-512 hex digest as produced by `sha512sum`.
pub const CHECKSUM_HEX_LEN: usize = 128;

/// A monitored target, identified by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
}

/// One tracked file on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub id: i64,
    pub host_id: i64,
    pub path: String,
    pub checksum: String,
}

/// One `(path, checksum)` pair observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub path: String,
    pub checksum: String,
}

impl InventoryEntry {
    pub fn new(path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
        }
    }
}

impl<P: Into<String>, C: Into<String>> From<(P, C)> for InventoryEntry {
    fn from((path, checksum): (P, C)) -> Self {
        Self::new(path, checksum)
    }
}

/// Returns true if `checksum` looks like a SHA-512 hex digest.
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum.len() == CHECKSUM_HEX_LEN && checksum.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Classification of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one detected change.
///
/// `path` and `checksum` are copied from the baseline record at the moment
/// the change was detected: for [`ChangeKind::Modified`] `checksum` is the
/// previously recorded digest and `new_checksum` the observed one, for
/// [`ChangeKind::Removed`] it is the last known digest of the deleted
/// record. `record_id` may name a record that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub record_id: i64,
    pub path: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_checksum: Option<String>,
}

impl ChangeEvent {
    pub fn added(record: &BaselineRecord) -> Self {
        Self::snapshot(
            ChangeKind::Added,
            format!("A new file was detected at '{}'", record.path),
            record,
            None,
        )
    }

    pub fn modified(record: &BaselineRecord, new_checksum: &str) -> Self {
        Self::snapshot(
            ChangeKind::Modified,
            format!("File modification was detected at '{}'", record.path),
            record,
            Some(new_checksum.to_string()),
        )
    }

    pub fn removed(record: &BaselineRecord) -> Self {
        Self::snapshot(
            ChangeKind::Removed,
            format!("File removal was detected at '{}'", record.path),
            record,
            None,
        )
    }

    fn snapshot(
        kind: ChangeKind,
        description: String,
        record: &BaselineRecord,
        new_checksum: Option<String>,
    ) -> Self {
        Self {
            kind,
            description,
            timestamp: Utc::now(),
            record_id: record.id,
            path: record.path.clone(),
            checksum: record.checksum.clone(),
            new_checksum,
        }
    }
}

/// A persisted change event as read back from the audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub host_id: i64,
    pub record_id: Option<i64>,
    pub kind: ChangeKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub checksum: String,
    pub new_checksum: Option<String>,
}

/// Per-kind event counts of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ScanStatistics {
    pub fn from_events(events: &[ChangeEvent]) -> Self {
        events.iter().fold(Self::default(), |mut stats, event| {
            match event.kind {
                ChangeKind::Added => stats.added += 1,
                ChangeKind::Removed => stats.removed += 1,
                ChangeKind::Modified => stats.modified += 1,
            }
            stats
        })
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        match kind {
            ChangeKind::Added => self.added,
            ChangeKind::Removed => self.removed,
            ChangeKind::Modified => self.modified,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}
