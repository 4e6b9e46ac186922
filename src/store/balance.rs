//! Balance store primitives. [`apply_delta`] is the only statement in the
//! crate that writes `accounts.balance`.

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::{account::AccountId, money::MinorUnits};

use super::StoreError;

/// Lower bound a delta has to respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Floor {
    None,
    AtLeast(MinorUnits),
}

impl Floor {
    fn as_param(self) -> Option<MinorUnits> {
        match self {
            Floor::None => None,
            Floor::AtLeast(floor) => Some(floor),
        }
    }
}

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("Account {0} not found")]
    NotFound(AccountId),
    #[error("Account {account} holds {balance}, applying {delta} would cross the floor {floor}")]
    FloorViolation {
        account: AccountId,
        balance: MinorUnits,
        delta: MinorUnits,
        floor: MinorUnits,
    },
    #[error("Account {account} holds {balance}, applying {delta} is out of range")]
    OutOfRange {
        account: AccountId,
        balance: MinorUnits,
        delta: MinorUnits,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for BalanceError {
    fn from(err: rusqlite::Error) -> Self {
        BalanceError::Store(err.into())
    }
}

pub fn get(conn: &Connection, account: AccountId) -> Result<MinorUnits, BalanceError> {
    conn.query_row(
        "SELECT balance FROM accounts WHERE id = ?1",
        params![account],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(BalanceError::NotFound(account))
}

/// `balance = balance + delta`, guarded by the floor and by the integer
/// range of the column, as one statement.
///
/// Concurrent deltas on the same account serialize on the row, so the
/// floor is always evaluated against the balance left by the previous
/// writer. On failure nothing is changed.
pub fn apply_delta(
    conn: &Connection,
    account: AccountId,
    delta: MinorUnits,
    floor: Floor,
) -> Result<MinorUnits, BalanceError> {
    let updated: Option<MinorUnits> = conn
        .query_row(
            "UPDATE accounts SET balance = balance + ?1
             WHERE id = ?2
               AND (?1 <= 0 OR balance <= ?4 - ?1)
               AND (?1 >= 0 OR balance >= ?5 - ?1)
               AND (?3 IS NULL OR balance + ?1 >= ?3)
             RETURNING balance",
            params![delta, account, floor.as_param(), MinorUnits::MAX, MinorUnits::MIN],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(balance) = updated {
        return Ok(balance);
    }

    // nothing matched: the row is missing, the sum would not fit or the floor refused
    let balance = get(conn, account)?;
    if balance.checked_add(delta).is_none() {
        return Err(BalanceError::OutOfRange {
            account,
            balance,
            delta,
        });
    }
    match floor {
        Floor::AtLeast(floor) => Err(BalanceError::FloorViolation {
            account,
            balance,
            delta,
            floor,
        }),
        Floor::None => Err(StoreError::CorruptRow {
            table: "accounts",
            reason: format!("unguarded update of account {account} matched no row"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::AccountKind,
        store::{accounts, open_in_memory},
    };

    fn setup(balance: MinorUnits) -> (Connection, AccountId) {
        let conn = open_in_memory().unwrap();
        let account = accounts::insert(&conn, balance, AccountKind::Individual, &[1]).unwrap();
        (conn, account.id())
    }

    #[test]
    fn get_balance() {
        let (conn, id) = setup(500_000);
        assert_eq!(get(&conn, id).unwrap(), 500_000);
        assert!(matches!(
            get(&conn, id + 1).unwrap_err(),
            BalanceError::NotFound(missing) if missing == id + 1
        ));
    }

    #[test]
    fn unguarded_delta() {
        let (conn, id) = setup(100);
        assert_eq!(apply_delta(&conn, id, 250, Floor::None).unwrap(), 350);
        // without a floor even a negative result is accepted
        assert_eq!(apply_delta(&conn, id, -400, Floor::None).unwrap(), -50);
        assert_eq!(get(&conn, id).unwrap(), -50);
    }

    #[test]
    fn guarded_delta() {
        let (conn, id) = setup(500_000);
        let floor = Floor::AtLeast(200_000);
        assert_eq!(apply_delta(&conn, id, -250_000, floor).unwrap(), 250_000);
        // exactly at the floor is fine
        assert_eq!(apply_delta(&conn, id, -50_000, floor).unwrap(), 200_000);

        let err = apply_delta(&conn, id, -1, floor).unwrap_err();
        assert!(matches!(
            err,
            BalanceError::FloorViolation {
                balance: 200_000,
                delta: -1,
                floor: 200_000,
                ..
            }
        ));
        assert_eq!(get(&conn, id).unwrap(), 200_000);
    }

    #[test]
    fn out_of_range_delta_changes_nothing() {
        let (conn, id) = setup(MinorUnits::MAX - 10);
        let err = apply_delta(&conn, id, 11, Floor::None).unwrap_err();
        assert!(matches!(err, BalanceError::OutOfRange { delta: 11, .. }));
        assert_eq!(get(&conn, id).unwrap(), MinorUnits::MAX - 10);
        assert_eq!(apply_delta(&conn, id, 10, Floor::None).unwrap(), MinorUnits::MAX);

        let (conn, id) = setup(MinorUnits::MIN + 10);
        let err = apply_delta(&conn, id, -11, Floor::None).unwrap_err();
        assert!(matches!(err, BalanceError::OutOfRange { delta: -11, .. }));
        assert_eq!(get(&conn, id).unwrap(), MinorUnits::MIN + 10);
    }

    #[test]
    fn missing_account() {
        let (conn, id) = setup(0);
        for floor in [Floor::None, Floor::AtLeast(0)] {
            assert!(matches!(
                apply_delta(&conn, id + 7, 10, floor).unwrap_err(),
                BalanceError::NotFound(_)
            ));
        }
    }
}
