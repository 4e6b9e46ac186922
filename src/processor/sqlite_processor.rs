use std::{thread, time::Duration};

use rusqlite::{Connection, Transaction};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::{
    account::{Account, AccountId, AccountNumber, CustomerId},
    command::{Operation, ValidationError},
    engine::MutationEngine,
    money::from_minor_units,
    store::{
        self, Database, StoreError,
        accounts::{self, AccountResolver},
        balance::{self, BalanceError},
        ledger::{self, TransactionId, TransactionRecord},
    },
};

use super::{AccountRef, Outcome, ProcessError, Receipt, TransactionProcessor};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

/// Lifecycle of one unit of work. There is no partially committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Validated,
    LegsApplying,
    Committed,
    Aborted,
}

/// Transaction processor over one SQLite connection. Run one per worker;
/// conflicting workers are serialized by the store, never by this type.
pub struct SqliteTransactionProcessor {
    conn: Connection,
    engine: MutationEngine,
    max_conflict_retries: u32,
}

impl SqliteTransactionProcessor {
    pub fn new(conn: Connection, engine: MutationEngine) -> Self {
        Self {
            conn,
            engine,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn connect(database: &Database, engine: MutationEngine) -> Result<Self, StoreError> {
        Ok(Self::new(database.connect()?, engine))
    }

    /// How many extra attempts a unit gets when the store reports contention.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn engine(&self) -> &MutationEngine {
        &self.engine
    }

    pub fn account_by_id(&self, id: AccountId) -> Result<Account, ProcessError> {
        self.conn
            .resolve_by_id(id)?
            .ok_or(ProcessError::AccountNotFound(AccountRef::Id(id)))
    }

    pub fn account_by_number(&self, number: &AccountNumber) -> Result<Account, ProcessError> {
        self.conn
            .resolve_by_number(number)?
            .ok_or(ProcessError::AccountNotFound(AccountRef::Number(*number)))
    }

    pub fn accounts(&self) -> Result<Vec<Account>, ProcessError> {
        Ok(accounts::all(&self.conn)?)
    }

    /// Accounts the customer owns, alone or jointly.
    pub fn accounts_of(&self, customer: CustomerId) -> Result<Vec<Account>, ProcessError> {
        Ok(accounts::owned_by(&self.conn, customer)?)
    }

    pub fn balance(&self, id: AccountId) -> Result<Decimal, ProcessError> {
        match balance::get(&self.conn, id) {
            Ok(balance) => Ok(from_minor_units(balance)),
            Err(BalanceError::NotFound(id)) => {
                Err(ProcessError::AccountNotFound(AccountRef::Id(id)))
            }
            Err(BalanceError::Store(err)) => Err(err.into()),
            Err(err @ (BalanceError::FloorViolation { .. } | BalanceError::OutOfRange { .. })) => {
                Err(ProcessError::InvariantViolation(err.to_string()))
            }
        }
    }

    pub fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, ProcessError> {
        Ok(ledger::find(&self.conn, id)?)
    }

    pub fn transactions_for_account(
        &self,
        number: &AccountNumber,
    ) -> Result<Vec<TransactionRecord>, ProcessError> {
        let account = self.account_by_number(number)?;
        Ok(ledger::for_account(&self.conn, &account)?)
    }

    pub fn transaction_count(&self) -> Result<u64, ProcessError> {
        Ok(ledger::count(&self.conn)?)
    }

    /// Runs `work` inside a unit of work and commits it. Any error drops the
    /// unit, which rolls back every leg applied so far. Store contention is
    /// retried with a short linear backoff before it is surfaced.
    pub(crate) fn run_unit<T, F>(
        &mut self,
        label: &'static str,
        mut work: F,
    ) -> Result<T, ProcessError>
    where
        F: FnMut(&Transaction<'_>, &MutationEngine) -> Result<T, ProcessError>,
    {
        let attempts = self.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            match Self::attempt_unit(&mut self.conn, &self.engine, &mut work) {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(label, attempt, error = %err, "store conflict, retrying unit");
                    thread::sleep(CONFLICT_BACKOFF * attempt);
                }
                Err(err) if err.is_retryable() => {
                    warn!(label, attempts, error = %err, "store conflict, giving up");
                    return Err(ProcessError::StoreConflict { attempts });
                }
                result => return result,
            }
        }
        Err(ProcessError::StoreConflict { attempts })
    }

    fn attempt_unit<T, F>(
        conn: &mut Connection,
        engine: &MutationEngine,
        work: &mut F,
    ) -> Result<T, ProcessError>
    where
        F: FnMut(&Transaction<'_>, &MutationEngine) -> Result<T, ProcessError>,
    {
        let unit = store::begin(conn)?;
        debug!(state = ?UnitState::LegsApplying, "unit started");
        match work(&unit, engine) {
            Ok(value) => {
                unit.commit().map_err(StoreError::from)?;
                debug!(state = ?UnitState::Committed, "unit committed");
                Ok(value)
            }
            Err(err) => {
                // dropping the unit rolls it back
                drop(unit);
                debug!(state = ?UnitState::Aborted, error = %err, "unit aborted");
                Err(err)
            }
        }
    }
}

fn apply_operation(
    unit: &Connection,
    engine: &MutationEngine,
    operation: &Operation,
) -> Result<Receipt, ProcessError> {
    let balance = match operation {
        Operation::Deposit {
            account, amount, ..
        } => engine.credit(unit, *account, amount)?,
        Operation::Withdraw {
            account, amount, ..
        } => engine.debit(unit, *account, amount)?,
        Operation::Transfer {
            sender,
            receiver,
            amount,
            ..
        } => {
            let source = unit
                .resolve_by_id(*sender)?
                .ok_or(ProcessError::AccountNotFound(AccountRef::Id(*sender)))?;
            // refused before any leg runs, whatever the sender's balance
            if source.number() == *receiver {
                return Err(ValidationError::SelfTransfer.into());
            }
            let balance = engine.debit(unit, *sender, amount)?;
            let target = unit
                .resolve_by_number(receiver)?
                .ok_or(ProcessError::AccountNotFound(AccountRef::Number(*receiver)))?;
            engine.credit(unit, target.id(), amount)?;
            balance
        }
    };
    let record = ledger::append(unit, operation)?;
    Ok(Receipt { record, balance })
}

impl TransactionProcessor for SqliteTransactionProcessor {
    fn execute(&mut self, operation: Operation) -> Outcome {
        debug!(
            state = ?UnitState::Validated,
            kind = %operation.kind(),
            account = operation.account(),
            amount = %operation.amount(),
            "operation validated"
        );
        let outcome = self.run_unit("operation", |unit, engine| {
            apply_operation(unit, engine, &operation)
        });
        match &outcome {
            Ok(receipt) => info!(
                id = receipt.record.id,
                kind = %receipt.record.kind,
                account = operation.account(),
                amount = %receipt.record.amount,
                balance = %receipt.balance,
                "transaction committed"
            ),
            Err(err @ ProcessError::InvariantViolation(_)) => error!(
                kind = %operation.kind(),
                account = operation.account(),
                error = %err,
                "transaction aborted on a broken invariant"
            ),
            Err(err) => info!(
                kind = %operation.kind(),
                account = operation.account(),
                code = err.code(),
                error = %err,
                "transaction rejected"
            ),
        }
        outcome
    }
}
