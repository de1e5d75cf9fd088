//! Reconciliation of a fresh inventory against a host's baseline.
//!
//! A pass runs in two sweeps. The forward sweep walks the inventory in input
//! order and classifies each entry as unchanged, added or modified. The
//! backward sweep walks the host's records (including the ones the forward
//! sweep just created) and removes every record whose path the inventory no
//! longer lists. Events come out in that order: additions and modifications
//! interleaved as the inventory listed them, then removals in record order.

use crate::error::{IntegrityError, Result};
use crate::models::{ChangeEvent, Host, InventoryEntry, ScanStatistics};
use crate::store::{BaselineStore, StoreBackend};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Engine bound to one pass-scoped store handle.
pub struct Reconciler<'s, S: BaselineStore> {
    store: &'s mut S,
}

impl<'s, S: BaselineStore> Reconciler<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    /// Brings the baseline of `host` in line with `inventory` and returns the
    /// detected changes. With `first_run` set the baseline is only seeded and
    /// no events are produced.
    ///
    /// Every event is also appended to the store's history. Nothing is
    /// committed here; on error the caller drops the pass.
    pub fn reconcile(
        &mut self,
        host: &Host,
        inventory: &[InventoryEntry],
        first_run: bool,
    ) -> Result<Vec<ChangeEvent>> {
        let entries = dedup_inventory(inventory)?;
        let mut events = Vec::new();

        for entry in &entries {
            if self
                .store
                .find_record(host, &entry.path, &entry.checksum)?
                .is_some()
            {
                continue;
            }

            match self.store.find_record_by_path(host, &entry.path)? {
                None => {
                    let record = self.store.create_record(host, &entry.path, &entry.checksum)?;
                    if !first_run {
                        let event = ChangeEvent::added(&record);
                        self.store.append_event(host, &event)?;
                        events.push(event);
                    }
                }
                Some(record) => {
                    let event = ChangeEvent::modified(&record, &entry.checksum);
                    self.store.append_event(host, &event)?;
                    events.push(event);
                    self.store.update_record_checksum(&record, &entry.checksum)?;
                }
            }
        }

        let observed: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        for record in self.store.records_for(host)? {
            if observed.contains(record.path.as_str()) {
                continue;
            }
            let event = ChangeEvent::removed(&record);
            self.store.append_event(host, &event)?;
            events.push(event);
            self.store.delete_record(&record)?;
        }

        debug!(
            host = %host.name,
            entries = entries.len(),
            events = events.len(),
            first_run,
            "reconciliation finished"
        );
        Ok(events)
    }
}

/// Drops repeated identical entries, keeping the first occurrence's position.
/// The same path listed with two different checksums cannot be classified
/// and fails the pass.
fn dedup_inventory(inventory: &[InventoryEntry]) -> Result<Vec<&InventoryEntry>> {
    let mut seen: HashMap<&str, &str> = HashMap::with_capacity(inventory.len());
    let mut unique = Vec::with_capacity(inventory.len());

    for entry in inventory {
        match seen.get(entry.path.as_str()) {
            None => {
                seen.insert(&entry.path, &entry.checksum);
                unique.push(entry);
            }
            Some(&first) if first == entry.checksum => {
                debug!(path = %entry.path, "duplicate inventory entry ignored");
            }
            Some(&first) => {
                return Err(IntegrityError::ConflictingInventory {
                    path: entry.path.clone(),
                    first: first.to_string(),
                    second: entry.checksum.clone(),
                });
            }
        }
    }
    Ok(unique)
}

/// Result of one committed pass.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub host: Host,
    pub first_run: bool,
    pub events: Vec<ChangeEvent>,
    pub statistics: ScanStatistics,
}

/// Runs one full pass for `host_name`: creates the host on first sight
/// (seeding its baseline without events), otherwise reconciles against the
/// stored baseline, then commits.
pub fn run_pass<B: StoreBackend>(
    backend: &mut B,
    host_name: &str,
    inventory: &[InventoryEntry],
) -> Result<PassOutcome> {
    let mut pass = backend.begin_pass()?;

    let (host, first_run) = if pass.host_exists(host_name)? {
        (pass.get_host(host_name)?, false)
    } else {
        info!(host = %host_name, "first run detected, setting up tracker");
        warn!("no changes can be detected during this session");
        (pass.create_host(host_name)?, true)
    };

    let events = Reconciler::new(&mut pass).reconcile(&host, inventory, first_run)?;
    pass.commit()?;

    let statistics = ScanStatistics::from_events(&events);
    Ok(PassOutcome {
        host,
        first_run,
        events,
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;
    use crate::store::MemoryStore;

    fn inv(entries: &[(&str, &str)]) -> Vec<InventoryEntry> {
        entries.iter().map(|&(p, c)| InventoryEntry::new(p, c)).collect()
    }

    #[test]
    fn dedup_keeps_first_position() {
        let inventory = inv(&[("/a", "c1"), ("/b", "c2"), ("/a", "c1")]);
        let unique = dedup_inventory(&inventory).unwrap();
        let paths: Vec<_> = unique.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn dedup_rejects_conflicting_checksums() {
        let inventory = inv(&[("/a", "c1"), ("/a", "c9")]);
        let err = dedup_inventory(&inventory).unwrap_err();
        match err {
            IntegrityError::ConflictingInventory { path, first, second } => {
                assert_eq!(path, "/a");
                assert_eq!(first, "c1");
                assert_eq!(second, "c9");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn first_pass_creates_host_and_seeds_silently() {
        let mut store = MemoryStore::new();
        let outcome = run_pass(&mut store, "web-01", &inv(&[("/x", "c1")])).unwrap();
        assert!(outcome.first_run);
        assert!(outcome.events.is_empty());
        assert_eq!(store.records_of("web-01").len(), 1);
    }

    #[test]
    fn second_pass_reports_against_seeded_baseline() {
        let mut store = MemoryStore::new();
        run_pass(&mut store, "web-01", &inv(&[("/x", "c1")])).unwrap();
        let outcome = run_pass(&mut store, "web-01", &inv(&[("/x", "c2")])).unwrap();
        assert!(!outcome.first_run);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, ChangeKind::Modified);
        assert_eq!(outcome.statistics.modified, 1);
    }

    #[test]
    fn conflicting_inventory_leaves_store_untouched() {
        let mut store = MemoryStore::new();
        run_pass(&mut store, "web-01", &inv(&[("/x", "c1")])).unwrap();
        let err = run_pass(&mut store, "web-01", &inv(&[("/y", "c2"), ("/y", "c3")]));
        assert!(err.is_err());
        let records = store.records_of("web-01");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/x");
    }
}
