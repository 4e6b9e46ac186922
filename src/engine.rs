use rusqlite::Connection;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    account::{AccountId, MIN_BALANCE_MINOR_UNITS},
    money::{Amount, MinorUnits, MoneyError, from_minor_units, to_minor_units},
    store::{
        StoreError,
        balance::{self, BalanceError, Floor},
    },
};

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),
    #[error("Insufficient funds on account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("Applying {requested} to account {account} holding {balance} is out of range")]
    OutOfRange {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies single-account legs inside a unit of work owned by the caller.
/// Credits are unbounded, debits must leave at least the minimum balance.
#[derive(Debug, Clone, Copy)]
pub struct MutationEngine {
    floor: MinorUnits,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self {
            floor: MIN_BALANCE_MINOR_UNITS,
        }
    }
}

impl MutationEngine {
    pub fn new(min_balance: Decimal) -> Result<Self, MoneyError> {
        Ok(Self {
            floor: to_minor_units(min_balance)?,
        })
    }

    pub fn min_balance(&self) -> Decimal {
        from_minor_units(self.floor)
    }

    pub(crate) fn floor_minor_units(&self) -> MinorUnits {
        self.floor
    }

    /// Adds `amount` to the account and returns the new balance.
    pub fn credit(
        &self,
        unit: &Connection,
        account: AccountId,
        amount: &Amount,
    ) -> Result<Decimal, MutationError> {
        match balance::apply_delta(unit, account, amount.minor_units(), Floor::None) {
            Ok(balance) => {
                debug!(account, %amount, balance, "credit applied");
                Ok(from_minor_units(balance))
            }
            Err(BalanceError::NotFound(account)) => Err(MutationError::AccountNotFound(account)),
            Err(BalanceError::FloorViolation { .. }) => Err(self.invariant_violation(format!(
                "unguarded credit of {amount} on account {account} hit a floor"
            ))),
            Err(BalanceError::OutOfRange { balance, .. }) => {
                Err(Self::out_of_range(account, balance, amount))
            }
            Err(BalanceError::Store(err)) => Err(err.into()),
        }
    }

    /// Takes `amount` from the account and returns the new balance, or
    /// [`MutationError::InsufficientFunds`] with nothing changed.
    pub fn debit(
        &self,
        unit: &Connection,
        account: AccountId,
        amount: &Amount,
    ) -> Result<Decimal, MutationError> {
        let delta = -amount.minor_units();
        match balance::apply_delta(unit, account, delta, Floor::AtLeast(self.floor)) {
            Ok(balance) if balance < self.floor => Err(self.invariant_violation(format!(
                "debit of {amount} left account {account} at {} below the floor {}",
                from_minor_units(balance),
                self.min_balance()
            ))),
            Ok(balance) => {
                debug!(account, %amount, balance, "debit applied");
                Ok(from_minor_units(balance))
            }
            Err(BalanceError::NotFound(account)) => Err(MutationError::AccountNotFound(account)),
            Err(BalanceError::FloorViolation { balance, .. }) => {
                debug!(account, %amount, balance, "debit refused by the floor");
                Err(MutationError::InsufficientFunds {
                    account,
                    balance: from_minor_units(balance),
                    requested: amount.value(),
                })
            }
            Err(BalanceError::OutOfRange { balance, .. }) => {
                Err(Self::out_of_range(account, balance, amount))
            }
            Err(BalanceError::Store(err)) => Err(err.into()),
        }
    }

    fn out_of_range(account: AccountId, balance: MinorUnits, amount: &Amount) -> MutationError {
        MutationError::OutOfRange {
            account,
            balance: from_minor_units(balance),
            requested: amount.value(),
        }
    }

    fn invariant_violation(&self, message: String) -> MutationError {
        error!(%message, "balance invariant violated");
        MutationError::InvariantViolation(message)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;
    use crate::{
        account::{AccountKind, MIN_BALANCE},
        store::{accounts, open_in_memory},
    };

    fn amount(value: u32) -> Amount {
        Amount::new(Decimal::from_u32(value).unwrap()).unwrap()
    }

    fn setup(balance: u32) -> (Connection, AccountId) {
        let conn = open_in_memory().unwrap();
        let opening = to_minor_units(Decimal::from_u32(balance).unwrap()).unwrap();
        let account = accounts::insert(&conn, opening, AccountKind::Individual, &[1]).unwrap();
        (conn, account.id())
    }

    #[test]
    fn default_floor_is_min_balance() {
        let engine = MutationEngine::default();
        assert_eq!(engine.min_balance(), MIN_BALANCE);
        assert_eq!(
            MutationEngine::new(Decimal::ZERO).unwrap().min_balance(),
            Decimal::ZERO
        );
        assert!(MutationEngine::new(Decimal::new(1, 3)).is_err());
    }

    #[test]
    fn debit_below_floor_leaves_balance() {
        let (conn, id) = setup(2500);
        let engine = MutationEngine::default();
        let err = engine.debit(&conn, id, &amount(1000)).unwrap_err();
        assert!(matches!(
            err,
            MutationError::InsufficientFunds { account, balance, requested }
                if account == id
                    && balance == Decimal::from_u32(2500).unwrap()
                    && requested == Decimal::from_u32(1000).unwrap()
        ));
        assert_eq!(balance::get(&conn, id).unwrap(), 250_000);
    }

    #[test]
    fn credit_then_debit_round_trips() {
        let (conn, id) = setup(5000);
        let engine = MutationEngine::default();
        for value in [1, 250, 3000, 99_999] {
            engine.credit(&conn, id, &amount(value)).unwrap();
            let balance = engine.debit(&conn, id, &amount(value)).unwrap();
            assert_eq!(balance, Decimal::from_u32(5000).unwrap());
        }
    }

    #[test]
    fn credits_ignore_the_floor() {
        let (conn, id) = setup(0);
        let engine = MutationEngine::default();
        let balance = engine.credit(&conn, id, &amount(10)).unwrap();
        assert_eq!(balance, Decimal::from_u32(10).unwrap());
    }

    #[test]
    fn credit_past_the_integer_range_is_refused() {
        let (conn, id) = setup(5000);
        let engine = MutationEngine::default();
        let huge = Amount::new(Decimal::from(90_000_000_000_000_000i64)).unwrap();
        engine.credit(&conn, id, &huge).unwrap();

        let err = engine.credit(&conn, id, &huge).unwrap_err();
        assert!(matches!(
            err,
            MutationError::OutOfRange { account, requested, .. }
                if account == id && requested == huge.value()
        ));
        assert_eq!(balance::get(&conn, id).unwrap(), 9_000_000_000_000_500_000);
    }

    #[test]
    fn missing_account() {
        let (conn, id) = setup(5000);
        let engine = MutationEngine::default();
        assert!(matches!(
            engine.credit(&conn, id + 1, &amount(1)).unwrap_err(),
            MutationError::AccountNotFound(missing) if missing == id + 1
        ));
        assert!(matches!(
            engine.debit(&conn, id + 1, &amount(1)).unwrap_err(),
            MutationError::AccountNotFound(_)
        ));
    }
}
