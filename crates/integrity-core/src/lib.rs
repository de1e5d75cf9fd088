//! integrity-core: baseline store and reconciliation engine
//!
//! A host's baseline is the set of `(path, checksum)` pairs recorded by the
//! last scan. Each scan produces a fresh inventory; [`run_pass`] compares it
//! against the baseline, emits [`ChangeEvent`]s for additions, modifications
//! and removals, and rewrites the baseline to match, all inside one store
//! transaction.
//!
//! The very first pass for a host only seeds the baseline and reports
//! nothing.

pub mod error;
pub mod models;
pub mod paths;
pub mod reconcile;
pub mod store;

pub use error::{IntegrityError, StoreError};
pub use models::{
    is_valid_checksum, BaselineRecord, ChangeEvent, ChangeKind, EventRow, Host, InventoryEntry,
    ScanStatistics,
};
pub use reconcile::{run_pass, PassOutcome, Reconciler};
pub use store::{BaselineStore, MemoryStore, SqliteStore, StoreBackend};
