use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Host already exists: {0}")]
    DuplicateHost(String),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Failure of a reconciliation pass. Nothing from the pass is committed.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Baseline store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Inventory lists '{path}' twice with different checksums ({first} and {second})")]
    ConflictingInventory {
        path: String,
        first: String,
        second: String,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, IntegrityError>;
