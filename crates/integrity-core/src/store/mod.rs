//! Baseline store contract and its backends.
//!
//! A backend hands out one [`BaselineStore`] per reconciliation pass. Every
//! mutation made through that handle becomes visible to later passes only
//! once [`BaselineStore::commit`] succeeds; dropping the handle without
//! committing discards the whole pass.

use crate::error::StoreResult;
use crate::models::{BaselineRecord, ChangeEvent, Host};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Pass-scoped view of the baseline.
pub trait BaselineStore {
    fn host_exists(&self, name: &str) -> StoreResult<bool>;

    /// Fails with [`StoreError::DuplicateHost`](crate::StoreError::DuplicateHost)
    /// if the name is taken.
    fn create_host(&mut self, name: &str) -> StoreResult<Host>;

    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound) if absent.
    fn get_host(&self, name: &str) -> StoreResult<Host>;

    /// Live records of `host`, in creation order.
    fn records_for(&self, host: &Host) -> StoreResult<Vec<BaselineRecord>>;

    /// Exact match on both path and checksum.
    fn find_record(
        &self,
        host: &Host,
        path: &str,
        checksum: &str,
    ) -> StoreResult<Option<BaselineRecord>>;

    /// Match on path alone, whatever the recorded checksum.
    fn find_record_by_path(&self, host: &Host, path: &str) -> StoreResult<Option<BaselineRecord>>;

    fn create_record(&mut self, host: &Host, path: &str, checksum: &str)
        -> StoreResult<BaselineRecord>;

    fn update_record_checksum(
        &mut self,
        record: &BaselineRecord,
        new_checksum: &str,
    ) -> StoreResult<()>;

    fn delete_record(&mut self, record: &BaselineRecord) -> StoreResult<()>;

    /// Appends `event` to the audit history of `host`.
    fn append_event(&mut self, host: &Host, event: &ChangeEvent) -> StoreResult<i64>;

    /// Atomically persists every mutation made through this handle.
    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// A durable store able to open pass-scoped handles.
pub trait StoreBackend {
    type Pass<'a>: BaselineStore
    where
        Self: 'a;

    fn begin_pass(&mut self) -> StoreResult<Self::Pass<'_>>;
}
