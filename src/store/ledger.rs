//! Append-only transaction ledger. Records are never updated, except that
//! [`detach_account`] clears the account reference of a closing account.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    account::{Account, AccountId, AccountNumber},
    command::{Operation, TransactionKind},
    money::{MinorUnits, from_minor_units},
};

use super::StoreError;

pub type TransactionId = i64;

const SELECT_RECORD: &str =
    "SELECT id, account_id, amount, kind, channel, receiver_account_number, created_at
     FROM transactions";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// `None` once the account has been closed.
    pub account: Option<AccountId>,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub channel: String,
    pub receiver: Option<AccountNumber>,
    pub created_at: DateTime<Utc>,
}

struct RecordRow {
    id: TransactionId,
    account: Option<AccountId>,
    amount: MinorUnits,
    kind: String,
    channel: String,
    receiver: Option<String>,
    created_at: String,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account: row.get(1)?,
            amount: row.get(2)?,
            kind: row.get(3)?,
            channel: row.get(4)?,
            receiver: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<TransactionRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::CorruptRow {
            table: "transactions",
            reason: format!("record {id}: {reason}"),
        };
        let kind = self.kind.parse::<TransactionKind>().map_err(corrupt)?;
        let receiver = self
            .receiver
            .map(|number| number.parse::<AccountNumber>())
            .transpose()
            .map_err(|err| corrupt(err.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| corrupt(err.to_string()))?
            .with_timezone(&Utc);
        Ok(TransactionRecord {
            id,
            account: self.account,
            amount: from_minor_units(self.amount),
            kind,
            channel: self.channel,
            receiver,
            created_at,
        })
    }
}

/// Writes the record of a completed operation. Must run in the same unit of
/// work as the balance changes it describes.
pub fn append(conn: &Connection, operation: &Operation) -> Result<TransactionRecord, StoreError> {
    let created_at = Utc::now();
    let amount = operation.amount();
    let receiver = operation.receiver();
    conn.execute(
        "INSERT INTO transactions
             (account_id, amount, kind, channel, receiver_account_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            operation.account(),
            amount.minor_units(),
            operation.kind().as_str(),
            operation.channel(),
            receiver.map(|number| number.to_string()),
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(TransactionRecord {
        id: conn.last_insert_rowid(),
        account: Some(operation.account()),
        amount: amount.value(),
        kind: operation.kind(),
        channel: operation.channel().to_string(),
        receiver,
        created_at,
    })
}

pub fn find(conn: &Connection, id: TransactionId) -> Result<Option<TransactionRecord>, StoreError> {
    conn.query_row(
        &format!("{SELECT_RECORD} WHERE id = ?1"),
        params![id],
        RecordRow::read,
    )
    .optional()?
    .map(RecordRow::into_record)
    .transpose()
}

/// Records booked against the account plus transfers it received, oldest first.
pub fn for_account(
    conn: &Connection,
    account: &Account,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_RECORD} WHERE account_id = ?1 OR receiver_account_number = ?2 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(
            params![account.id(), account.number().to_string()],
            RecordRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RecordRow::into_record).collect()
}

/// Clears the account reference of every record booked against `account`.
/// Returns how many records were detached.
pub fn detach_account(conn: &Connection, account: AccountId) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE transactions SET account_id = NULL WHERE account_id = ?1",
        params![account],
    )?)
}

pub fn count(conn: &Connection) -> Result<u64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
}
