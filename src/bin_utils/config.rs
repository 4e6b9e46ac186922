use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::{
    account::MIN_BALANCE,
    engine::MutationEngine,
    processor::sqlite_processor::{DEFAULT_MAX_CONFLICT_RETRIES, SqliteTransactionProcessor},
    store::{Database, StoreConfig},
};

pub const DB_PATH_VAR: &str = "BANK_LEDGER_DB";
pub const MIN_BALANCE_VAR: &str = "BANK_LEDGER_MIN_BALANCE";
pub const BUSY_TIMEOUT_VAR: &str = "BANK_LEDGER_BUSY_TIMEOUT_MS";
pub const MAX_RETRIES_VAR: &str = "BANK_LEDGER_MAX_RETRIES";

pub const DEFAULT_DB_PATH: &str = "bank-ledger.db";

/// Runtime settings for the batch binary.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub min_balance: Decimal,
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::new(DEFAULT_DB_PATH),
            min_balance: MIN_BALANCE,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unset variables keep their defaults, set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup(DB_PATH_VAR) {
            config.store.path = PathBuf::from(path);
        }
        if let Some(value) = lookup(MIN_BALANCE_VAR) {
            config.min_balance = value
                .trim()
                .parse()
                .with_context(|| format!("{MIN_BALANCE_VAR} is not a decimal: `{value}`"))?;
        }
        if let Some(value) = lookup(BUSY_TIMEOUT_VAR) {
            let millis: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{BUSY_TIMEOUT_VAR} is not a number: `{value}`"))?;
            config.store.busy_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(MAX_RETRIES_VAR) {
            config.max_conflict_retries = value
                .trim()
                .parse()
                .with_context(|| format!("{MAX_RETRIES_VAR} is not a number: `{value}`"))?;
        }
        Ok(config)
    }

    pub fn engine(&self) -> Result<MutationEngine> {
        MutationEngine::new(self.min_balance)
            .with_context(|| format!("Invalid minimum balance {}", self.min_balance))
    }

    pub fn open_database(&self) -> Result<Database> {
        Database::open(self.store.clone()).with_context(|| {
            format!("Failed to open ledger store `{}`", self.store.path.display())
        })
    }

    pub fn processor(&self, database: &Database) -> Result<SqliteTransactionProcessor> {
        let processor = SqliteTransactionProcessor::connect(database, self.engine()?)
            .context("Failed to connect to the ledger store")?;
        Ok(processor.with_max_conflict_retries(self.max_conflict_retries))
    }
}
