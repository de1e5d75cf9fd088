//! SQLite backend.
//!
//! One write transaction per reconciliation pass. The transaction is opened
//! `IMMEDIATE` so a second process scanning against the same database file
//! waits on the busy timeout instead of interleaving with this one; two
//! processes reconciling the same host is still not a supported setup.

use crate::error::{StoreError, StoreResult};
use crate::models::{BaselineRecord, ChangeEvent, ChangeKind, EventRow, Host};
use crate::store::{BaselineStore, StoreBackend};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior,
};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        let store = Self { conn };
        store.migrate()?;
        debug!(path = %path.display(), "baseline database opened");
        Ok(store)
    }

    /// Open an existing database without writing to it. Neither the journal
    /// mode nor the schema is touched; a file that was never migrated is
    /// rejected.
    pub fn open_read_only(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        match store.schema_version()? {
            SCHEMA_VERSION => {}
            0 => {
                return Err(StoreError::Corrupt {
                    table: "schema_version",
                    reason: "database has no baseline schema".to_string(),
                })
            }
            current => return Err(newer_schema(current)),
        }
        debug!(path = %path.display(), "baseline database opened read-only");
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> StoreResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(newer_schema(current));
        }
        if current < 1 {
            self.migrate_v1()?;
        }
        Ok(())
    }

    /// 0 when the database was never migrated.
    fn schema_version(&self) -> StoreResult<i32> {
        let has_table: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(0);
        }
        let current = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(current)
    }

    fn migrate_v1(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            -- One row per tracked file; AUTOINCREMENT keeps ids from being reused
            -- so change_events.record_id never points at an unrelated record.
            CREATE TABLE IF NOT EXISTS baseline_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                checksum TEXT NOT NULL,
                UNIQUE (host_id, path),
                FOREIGN KEY (host_id) REFERENCES hosts(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_baseline_records_host ON baseline_records(host_id);

            -- Append-only history; snapshot columns outlive the record.
            CREATE TABLE IF NOT EXISTS change_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL,
                record_id INTEGER,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                path TEXT NOT NULL,
                checksum TEXT NOT NULL,
                new_checksum TEXT,
                FOREIGN KEY (host_id) REFERENCES hosts(id) ON DELETE CASCADE,
                FOREIGN KEY (record_id) REFERENCES baseline_records(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_change_events_host ON change_events(host_id);
            CREATE INDEX IF NOT EXISTS idx_change_events_record ON change_events(record_id);

            INSERT OR REPLACE INTO schema_version (version) VALUES (1);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Read-only queries (inspector)
    // ========================================================================

    pub fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM hosts ORDER BY id")?;
        let hosts = stmt
            .query_map([], row_to_host)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hosts)
    }

    pub fn list_records(&self) -> StoreResult<Vec<BaselineRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, host_id, path, checksum FROM baseline_records ORDER BY id")?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn list_events(&self) -> StoreResult<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, host_id, record_id, kind, description, timestamp, path, checksum, new_checksum
             FROM change_events ORDER BY id",
        )?;
        let events = stmt
            .query_map([], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Live records of the named host, or an empty list if it is unknown.
    pub fn records_of(&self, host_name: &str) -> StoreResult<Vec<BaselineRecord>> {
        match host_by_name(&self.conn, host_name)? {
            Some(host) => records_for(&self.conn, &host),
            None => Ok(Vec::new()),
        }
    }
}

impl StoreBackend for SqliteStore {
    type Pass<'a> = SqlitePass<'a>;

    fn begin_pass(&mut self) -> StoreResult<SqlitePass<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqlitePass { tx })
    }
}

/// A reconciliation pass over an open SQLite transaction. Dropping it
/// without calling [`BaselineStore::commit`] rolls the pass back.
pub struct SqlitePass<'conn> {
    tx: Transaction<'conn>,
}

impl BaselineStore for SqlitePass<'_> {
    fn host_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(host_by_name(&self.tx, name)?.is_some())
    }

    fn create_host(&mut self, name: &str) -> StoreResult<Host> {
        if self.host_exists(name)? {
            return Err(StoreError::DuplicateHost(name.to_string()));
        }
        self.tx
            .execute("INSERT INTO hosts (name) VALUES (?1)", params![name])?;
        Ok(Host {
            id: self.tx.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    fn get_host(&self, name: &str) -> StoreResult<Host> {
        host_by_name(&self.tx, name)?.ok_or_else(|| StoreError::NotFound(format!("host '{name}'")))
    }

    fn records_for(&self, host: &Host) -> StoreResult<Vec<BaselineRecord>> {
        records_for(&self.tx, host)
    }

    fn find_record(
        &self,
        host: &Host,
        path: &str,
        checksum: &str,
    ) -> StoreResult<Option<BaselineRecord>> {
        self.tx
            .query_row(
                "SELECT id, host_id, path, checksum FROM baseline_records
                 WHERE host_id = ?1 AND path = ?2 AND checksum = ?3",
                params![host.id, path, checksum],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    fn find_record_by_path(&self, host: &Host, path: &str) -> StoreResult<Option<BaselineRecord>> {
        self.tx
            .query_row(
                "SELECT id, host_id, path, checksum FROM baseline_records
                 WHERE host_id = ?1 AND path = ?2",
                params![host.id, path],
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    fn create_record(
        &mut self,
        host: &Host,
        path: &str,
        checksum: &str,
    ) -> StoreResult<BaselineRecord> {
        self.tx.execute(
            "INSERT INTO baseline_records (host_id, path, checksum) VALUES (?1, ?2, ?3)",
            params![host.id, path, checksum],
        )?;
        Ok(BaselineRecord {
            id: self.tx.last_insert_rowid(),
            host_id: host.id,
            path: path.to_string(),
            checksum: checksum.to_string(),
        })
    }

    fn update_record_checksum(
        &mut self,
        record: &BaselineRecord,
        new_checksum: &str,
    ) -> StoreResult<()> {
        let changed = self.tx.execute(
            "UPDATE baseline_records SET checksum = ?1 WHERE id = ?2",
            params![new_checksum, record.id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("record {}", record.id)));
        }
        Ok(())
    }

    fn delete_record(&mut self, record: &BaselineRecord) -> StoreResult<()> {
        let changed = self
            .tx
            .execute("DELETE FROM baseline_records WHERE id = ?1", params![record.id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("record {}", record.id)));
        }
        Ok(())
    }

    fn append_event(&mut self, host: &Host, event: &ChangeEvent) -> StoreResult<i64> {
        self.tx.execute(
            "INSERT INTO change_events
             (host_id, record_id, kind, description, timestamp, path, checksum, new_checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                host.id,
                event.record_id,
                event.kind.as_str(),
                event.description,
                event.timestamp.to_rfc3339(),
                event.path,
                event.checksum,
                event.new_checksum,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// Row helpers shared by the store and its passes
// ============================================================================

fn host_by_name(conn: &Connection, name: &str) -> StoreResult<Option<Host>> {
    conn.query_row(
        "SELECT id, name FROM hosts WHERE name = ?1",
        params![name],
        row_to_host,
    )
    .optional()
    .map_err(Into::into)
}

fn records_for(conn: &Connection, host: &Host) -> StoreResult<Vec<BaselineRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, host_id, path, checksum FROM baseline_records WHERE host_id = ?1 ORDER BY id",
    )?;
    let records = stmt
        .query_map(params![host.id], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<Host> {
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BaselineRecord> {
    Ok(BaselineRecord {
        id: row.get(0)?,
        host_id: row.get(1)?,
        path: row.get(2)?,
        checksum: row.get(3)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<EventRow> {
    let kind_str: String = row.get(3)?;
    let kind = ChangeKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown change kind '{kind_str}'").into(),
        )
    })?;
    let ts_str: String = row.get(5)?;
    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(EventRow {
        id: row.get(0)?,
        host_id: row.get(1)?,
        record_id: row.get(2)?,
        kind,
        description: row.get(4)?,
        timestamp,
        path: row.get(6)?,
        checksum: row.get(7)?,
        new_checksum: row.get(8)?,
    })
}

fn newer_schema(current: i32) -> StoreError {
    StoreError::Corrupt {
        table: "schema_version",
        reason: format!("database schema v{current} is newer than supported v{SCHEMA_VERSION}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_host_rejects_duplicates() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut pass = store.begin_pass().unwrap();
        pass.create_host("web-01").unwrap();
        let err = pass.create_host("web-01").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHost(name) if name == "web-01"));
    }

    #[test]
    fn get_host_reports_missing_host() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pass = store.begin_pass().unwrap();
        assert!(matches!(pass.get_host("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn find_record_requires_matching_checksum() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut pass = store.begin_pass().unwrap();
        let host = pass.create_host("web-01").unwrap();
        pass.create_record(&host, "/etc/hosts", "c1").unwrap();

        assert!(pass.find_record(&host, "/etc/hosts", "c1").unwrap().is_some());
        assert!(pass.find_record(&host, "/etc/hosts", "c2").unwrap().is_none());
        assert!(pass.find_record_by_path(&host, "/etc/hosts").unwrap().is_some());
    }

    #[test]
    fn dropped_pass_rolls_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        {
            let mut pass = store.begin_pass().unwrap();
            let host = pass.create_host("web-01").unwrap();
            pass.create_record(&host, "/a", "c1").unwrap();
        }
        assert!(store.list_hosts().unwrap().is_empty());
        assert!(store.list_records().unwrap().is_empty());
    }

    #[test]
    fn committed_pass_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("data").join("integrity.db");
        {
            let mut store = SqliteStore::open(&db_path).unwrap();
            let mut pass = store.begin_pass().unwrap();
            let host = pass.create_host("web-01").unwrap();
            pass.create_record(&host, "/a", "c1").unwrap();
            pass.commit().unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        let records = store.records_of("web-01").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/a");
    }

    #[test]
    fn removed_event_outlives_its_record() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut pass = store.begin_pass().unwrap();
        let host = pass.create_host("web-01").unwrap();
        let record = pass.create_record(&host, "/a", "c1").unwrap();
        pass.append_event(&host, &ChangeEvent::removed(&record)).unwrap();
        pass.delete_record(&record).unwrap();
        pass.commit().unwrap();

        let events = store.list_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Removed);
        assert_eq!(events[0].record_id, None);
        assert_eq!(events[0].path, "/a");
        assert_eq!(events[0].checksum, "c1");
    }

    #[test]
    fn update_of_deleted_record_is_not_found() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut pass = store.begin_pass().unwrap();
        let host = pass.create_host("web-01").unwrap();
        let record = pass.create_record(&host, "/a", "c1").unwrap();
        pass.delete_record(&record).unwrap();
        assert!(matches!(
            pass.update_record_checksum(&record, "c2"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn read_only_open_reads_but_never_writes() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("integrity.db");
        {
            let mut store = SqliteStore::open(&db_path).unwrap();
            let mut pass = store.begin_pass().unwrap();
            let host = pass.create_host("web-01").unwrap();
            pass.create_record(&host, "/a", "c1").unwrap();
            pass.commit().unwrap();
        }

        let mut store = SqliteStore::open_read_only(&db_path).unwrap();
        assert_eq!(store.list_hosts().unwrap().len(), 1);
        assert_eq!(store.list_records().unwrap().len(), 1);

        let write = store
            .begin_pass()
            .and_then(|mut pass| pass.create_host("db-01").map(|_| ()));
        assert!(write.is_err());
    }

    #[test]
    fn read_only_open_does_not_create_files() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("absent.db");
        assert!(SqliteStore::open_read_only(&db_path).is_err());
        assert!(!db_path.exists());
    }

    #[test]
    fn read_only_open_rejects_foreign_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("other.db");
        Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE notes (body TEXT);")
            .unwrap();

        let err = SqliteStore::open_read_only(&db_path).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { table: "schema_version", .. }));
    }
}
