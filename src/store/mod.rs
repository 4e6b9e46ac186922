//! Durable store on top of SQLite.
//!
//! A [`Database`] is the explicit store handle: it knows where the data lives
//! and how connections are configured, and hands out one [`Connection`] per
//! worker. Units of work are SQLite transactions started with
//! [`begin`]; dropping an uncommitted unit rolls it back.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, info};

pub mod accounts;
pub mod balance;
pub mod ledger;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_number TEXT NOT NULL UNIQUE,
    balance INTEGER NOT NULL,
    account_kind TEXT NOT NULL,
    opened_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS account_owners (
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    customer_id INTEGER NOT NULL,
    PRIMARY KEY (account_id, customer_id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER REFERENCES accounts(id) ON DELETE RESTRICT,
    amount INTEGER NOT NULL,
    kind TEXT NOT NULL,
    channel TEXT NOT NULL,
    receiver_account_number TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_owners_customer ON account_owners(customer_id);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_receiver ON transactions(receiver_account_number);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is busy, unit of work could not complete: {0}")]
    Conflict(rusqlite::Error),
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("Corrupt {table} row: {reason}")]
    CorruptRow { table: &'static str, reason: String },
    #[error("Could not mint a unique account number after {attempts} attempts")]
    AccountNumberExhausted { attempts: u32 },
}

impl StoreError {
    /// Contention or busy timeout: the unit was rolled back and may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Conflict(err),
            _ => StoreError::Sqlite(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long a unit waits for the write lock before it gives up.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    config: StoreConfig,
}

impl Database {
    /// Opens (or creates) the database file and makes sure the tables exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let database = Self { config };
        let conn = database.connect()?;
        // WAL is persistent, later connections inherit it
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        setup_schema(&conn)?;
        info!(path = %database.config.path.display(), "ledger store ready");
        Ok(database)
    }

    pub fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.config.path)?;
        configure(&conn, self.config.busy_timeout)?;
        debug!(path = %self.config.path.display(), "opened store connection");
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

/// Private single-connection store, gone when the connection is dropped.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    configure(&conn, DEFAULT_BUSY_TIMEOUT)?;
    setup_schema(&conn)?;
    Ok(conn)
}

pub fn setup_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Starts a unit of work. The write lock is taken up front, so two units
/// touching the same rows serialize instead of failing at commit time.
pub fn begin(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<(), StoreError> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
