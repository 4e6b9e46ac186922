use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::warn;

use crate::{
    account::{Account, AccountId, AccountKind, AccountNumber, CustomerId},
    money::{MinorUnits, from_minor_units},
};

use super::StoreError;

const MINT_ATTEMPTS: u32 = 3;

const SELECT_ACCOUNT: &str =
    "SELECT id, account_number, balance, account_kind, opened_at FROM accounts";

/// Looks accounts up for the core. Implemented for any SQLite connection,
/// which includes an open unit of work.
pub trait AccountResolver {
    fn resolve_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn resolve_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError>;
}

impl AccountResolver for Connection {
    fn resolve_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = self
            .query_row(
                &format!("{SELECT_ACCOUNT} WHERE id = ?1"),
                params![id],
                AccountRow::read,
            )
            .optional()?;
        row.map(|row| row.into_account(self)).transpose()
    }

    fn resolve_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        let row = self
            .query_row(
                &format!("{SELECT_ACCOUNT} WHERE account_number = ?1"),
                params![number.to_string()],
                AccountRow::read,
            )
            .optional()?;
        row.map(|row| row.into_account(self)).transpose()
    }
}

struct AccountRow {
    id: AccountId,
    number: String,
    balance: MinorUnits,
    kind: String,
    opened_at: String,
}

impl AccountRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            number: row.get(1)?,
            balance: row.get(2)?,
            kind: row.get(3)?,
            opened_at: row.get(4)?,
        })
    }

    fn into_account(self, conn: &Connection) -> Result<Account, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            table: "accounts",
            reason,
        };
        let number = self
            .number
            .parse::<AccountNumber>()
            .map_err(|err| corrupt(format!("account {}: {err}", self.id)))?;
        let kind = self
            .kind
            .parse::<AccountKind>()
            .map_err(|err| corrupt(format!("account {}: {err}", self.id)))?;
        let opened_at = DateTime::parse_from_rfc3339(&self.opened_at)
            .map_err(|err| corrupt(format!("account {}: {err}", self.id)))?
            .with_timezone(&Utc);
        Ok(Account::new(
            self.id,
            number,
            from_minor_units(self.balance),
            kind,
            owners(conn, self.id)?,
            opened_at,
        ))
    }
}

/// Inserts a new account row with a freshly minted account number, then
/// its owner mappings. Meant to run inside a unit of work.
pub fn insert(
    conn: &Connection,
    opening_balance: MinorUnits,
    kind: AccountKind,
    owners: &[CustomerId],
) -> Result<Account, StoreError> {
    let opened_at = Utc::now();
    for attempt in 1..=MINT_ATTEMPTS {
        let number = AccountNumber::mint();
        let result = conn.execute(
            "INSERT INTO accounts (account_number, balance, account_kind, opened_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                number.to_string(),
                opening_balance,
                kind.as_str(),
                opened_at.to_rfc3339()
            ],
        );
        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                for owner in owners {
                    add_owner(conn, id, *owner)?;
                }
                return Ok(Account::new(
                    id,
                    number,
                    from_minor_units(opening_balance),
                    kind,
                    self::owners(conn, id)?,
                    opened_at,
                ));
            }
            Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                warn!(attempt, %number, "account number already taken");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(StoreError::AccountNumberExhausted {
        attempts: MINT_ATTEMPTS,
    })
}

pub fn owners(conn: &Connection, account: AccountId) -> Result<Vec<CustomerId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT customer_id FROM account_owners WHERE account_id = ?1 ORDER BY customer_id",
    )?;
    let owners = stmt
        .query_map(params![account], |row| row.get(0))?
        .collect::<Result<Vec<CustomerId>, _>>()?;
    Ok(owners)
}

/// Returns `false` when the customer already owned the account.
pub fn add_owner(
    conn: &Connection,
    account: AccountId,
    customer: CustomerId,
) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO account_owners (account_id, customer_id) VALUES (?1, ?2)",
        params![account, customer],
    )?;
    Ok(inserted > 0)
}

/// Returns `false` when the customer did not own the account.
pub fn remove_owner(
    conn: &Connection,
    account: AccountId,
    customer: CustomerId,
) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM account_owners WHERE account_id = ?1 AND customer_id = ?2",
        params![account, customer],
    )?;
    Ok(deleted > 0)
}

pub fn owned_by(conn: &Connection, customer: CustomerId) -> Result<Vec<Account>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ACCOUNT} WHERE id IN
         (SELECT account_id FROM account_owners WHERE customer_id = ?1)
         ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(params![customer], AccountRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|row| row.into_account(conn)).collect()
}

pub fn all(conn: &Connection) -> Result<Vec<Account>, StoreError> {
    let mut stmt = conn.prepare(&format!("{SELECT_ACCOUNT} ORDER BY id"))?;
    let rows = stmt
        .query_map([], AccountRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|row| row.into_account(conn)).collect()
}

/// Deletes the account row; owner mappings go with it. Ledger records must
/// have been detached first, the foreign key refuses the delete otherwise.
pub fn delete(conn: &Connection, account: AccountId) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM accounts WHERE id = ?1", params![account])?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use rust_decimal::{Decimal, prelude::FromPrimitive};

    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn insert_and_resolve() {
        let conn = open_in_memory().unwrap();
        let account = insert(&conn, 500_000, AccountKind::Joint, &[9, 3, 9]).unwrap();
        assert_eq!(account.balance(), Decimal::from_u32(5000).unwrap());
        assert_eq!(account.owners(), &[3, 9]);

        let by_id = conn.resolve_by_id(account.id()).unwrap().unwrap();
        assert_eq!(by_id.number(), account.number());
        assert_eq!(by_id.kind(), AccountKind::Joint);
        assert_eq!(by_id.opened_at(), account.opened_at());

        let by_number = conn.resolve_by_number(&account.number()).unwrap().unwrap();
        assert_eq!(by_number.id(), account.id());

        assert!(conn.resolve_by_id(account.id() + 1).unwrap().is_none());
        assert!(
            conn.resolve_by_number(&AccountNumber::mint())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn account_numbers_are_distinct() {
        let conn = open_in_memory().unwrap();
        let a = insert(&conn, 0, AccountKind::Individual, &[1]).unwrap();
        let b = insert(&conn, 0, AccountKind::Individual, &[1]).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.number(), b.number());
    }

    #[test]
    fn owner_mappings() {
        let conn = open_in_memory().unwrap();
        let joint = insert(&conn, 0, AccountKind::Joint, &[1, 2]).unwrap();
        let single = insert(&conn, 0, AccountKind::Individual, &[2]).unwrap();

        assert!(!add_owner(&conn, joint.id(), 1).unwrap());
        assert!(add_owner(&conn, joint.id(), 3).unwrap());
        assert_eq!(owners(&conn, joint.id()).unwrap(), vec![1, 2, 3]);

        let owned: Vec<AccountId> = owned_by(&conn, 2)
            .unwrap()
            .iter()
            .map(Account::id)
            .collect();
        assert_eq!(owned, vec![joint.id(), single.id()]);

        assert!(remove_owner(&conn, joint.id(), 1).unwrap());
        assert!(!remove_owner(&conn, joint.id(), 1).unwrap());
        assert_eq!(owners(&conn, joint.id()).unwrap(), vec![2, 3]);
    }

    #[test]
    fn delete_cascades_to_owners() {
        let conn = open_in_memory().unwrap();
        let account = insert(&conn, 0, AccountKind::Individual, &[4]).unwrap();
        assert!(delete(&conn, account.id()).unwrap());
        assert!(!delete(&conn, account.id()).unwrap());
        assert!(owners(&conn, account.id()).unwrap().is_empty());
        assert!(all(&conn).unwrap().is_empty());
    }
}
