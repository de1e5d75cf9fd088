//! In-memory backend.
//!
//! A pass works on a copy of the committed state and swaps it in on commit,
//! giving the same all-or-nothing behaviour as the SQLite backend.

use crate::error::{StoreError, StoreResult};
use crate::models::{BaselineRecord, ChangeEvent, EventRow, Host};
use crate::store::{BaselineStore, StoreBackend};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct State {
    hosts: Vec<Host>,
    // Keyed by id, so iteration follows creation order.
    records: BTreeMap<i64, BaselineRecord>,
    events: Vec<EventRow>,
    next_host_id: i64,
    next_record_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: State,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.committed.hosts.clone()
    }

    /// Committed records of the named host, in creation order.
    pub fn records_of(&self, host_name: &str) -> Vec<BaselineRecord> {
        let Some(host) = self.committed.hosts.iter().find(|h| h.name == host_name) else {
            return Vec::new();
        };
        self.committed
            .records
            .values()
            .filter(|r| r.host_id == host.id)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<EventRow> {
        self.committed.events.clone()
    }
}

impl StoreBackend for MemoryStore {
    type Pass<'a> = MemoryPass<'a>;

    fn begin_pass(&mut self) -> StoreResult<MemoryPass<'_>> {
        let working = self.committed.clone();
        Ok(MemoryPass {
            target: &mut self.committed,
            working,
        })
    }
}

pub struct MemoryPass<'a> {
    target: &'a mut State,
    working: State,
}

impl BaselineStore for MemoryPass<'_> {
    fn host_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.working.hosts.iter().any(|h| h.name == name))
    }

    fn create_host(&mut self, name: &str) -> StoreResult<Host> {
        if self.host_exists(name)? {
            return Err(StoreError::DuplicateHost(name.to_string()));
        }
        self.working.next_host_id += 1;
        let host = Host {
            id: self.working.next_host_id,
            name: name.to_string(),
        };
        self.working.hosts.push(host.clone());
        Ok(host)
    }

    fn get_host(&self, name: &str) -> StoreResult<Host> {
        self.working
            .hosts
            .iter()
            .find(|h| h.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("host '{name}'")))
    }

    fn records_for(&self, host: &Host) -> StoreResult<Vec<BaselineRecord>> {
        Ok(self
            .working
            .records
            .values()
            .filter(|r| r.host_id == host.id)
            .cloned()
            .collect())
    }

    fn find_record(
        &self,
        host: &Host,
        path: &str,
        checksum: &str,
    ) -> StoreResult<Option<BaselineRecord>> {
        Ok(self
            .working
            .records
            .values()
            .find(|r| r.host_id == host.id && r.path == path && r.checksum == checksum)
            .cloned())
    }

    fn find_record_by_path(&self, host: &Host, path: &str) -> StoreResult<Option<BaselineRecord>> {
        Ok(self
            .working
            .records
            .values()
            .find(|r| r.host_id == host.id && r.path == path)
            .cloned())
    }

    fn create_record(
        &mut self,
        host: &Host,
        path: &str,
        checksum: &str,
    ) -> StoreResult<BaselineRecord> {
        if self.find_record_by_path(host, path)?.is_some() {
            return Err(StoreError::Corrupt {
                table: "baseline_records",
                reason: format!("path '{path}' already tracked for host '{}'", host.name),
            });
        }
        self.working.next_record_id += 1;
        let record = BaselineRecord {
            id: self.working.next_record_id,
            host_id: host.id,
            path: path.to_string(),
            checksum: checksum.to_string(),
        };
        self.working.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_record_checksum(
        &mut self,
        record: &BaselineRecord,
        new_checksum: &str,
    ) -> StoreResult<()> {
        let live = self
            .working
            .records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("record {}", record.id)))?;
        live.checksum = new_checksum.to_string();
        Ok(())
    }

    fn delete_record(&mut self, record: &BaselineRecord) -> StoreResult<()> {
        self.working
            .records
            .remove(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("record {}", record.id)))?;
        for event in &mut self.working.events {
            if event.record_id == Some(record.id) {
                event.record_id = None;
            }
        }
        Ok(())
    }

    fn append_event(&mut self, host: &Host, event: &ChangeEvent) -> StoreResult<i64> {
        let id = self.working.events.len() as i64 + 1;
        self.working.events.push(EventRow {
            id,
            host_id: host.id,
            record_id: Some(event.record_id),
            kind: event.kind,
            description: event.description.clone(),
            timestamp: event.timestamp,
            path: event.path.clone(),
            checksum: event.checksum.clone(),
            new_checksum: event.new_checksum.clone(),
        });
        Ok(id)
    }

    fn commit(self) -> StoreResult<()> {
        *self.target = self.working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_pass_is_discarded() {
        let mut store = MemoryStore::new();
        {
            let mut pass = store.begin_pass().unwrap();
            pass.create_host("web-01").unwrap();
        }
        assert!(store.hosts().is_empty());
    }

    #[test]
    fn committed_pass_is_visible() {
        let mut store = MemoryStore::new();
        let mut pass = store.begin_pass().unwrap();
        let host = pass.create_host("web-01").unwrap();
        pass.create_record(&host, "/b", "c2").unwrap();
        pass.create_record(&host, "/a", "c1").unwrap();
        pass.commit().unwrap();

        let paths: Vec<_> = store.records_of("web-01").into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }

    #[test]
    fn deleting_a_record_detaches_its_events() {
        let mut store = MemoryStore::new();
        let mut pass = store.begin_pass().unwrap();
        let host = pass.create_host("web-01").unwrap();
        let record = pass.create_record(&host, "/a", "c1").unwrap();
        pass.append_event(&host, &ChangeEvent::removed(&record)).unwrap();
        pass.delete_record(&record).unwrap();
        pass.commit().unwrap();

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record_id, None);
    }
}
