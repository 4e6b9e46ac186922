use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    account::{Account, AccountId, AccountKind, AccountNumber, CustomerId},
    command::{Operation, OperationRequest, ValidationError},
    engine::MutationError,
    store::{StoreError, ledger::TransactionRecord},
};

pub mod registry;
pub mod sqlite_processor;

/// Which reference failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRef {
    Id(AccountId),
    Number(AccountNumber),
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Id(id) => write!(f, "id {id}"),
            AccountRef::Number(number) => write!(f, "number {number}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Account with {0} not found")]
    AccountNotFound(AccountRef),
    #[error("Insufficient funds on account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("Store conflict, gave up after {attempts} attempts")]
    StoreConflict { attempts: u32 },
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Customer {customer} does not own account {account}")]
    NotAnOwner {
        account: AccountNumber,
        customer: CustomerId,
    },
    #[error("Account {account} must keep at least one owner")]
    LastOwner { account: AccountNumber },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<MutationError> for ProcessError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::AccountNotFound(id) => ProcessError::AccountNotFound(AccountRef::Id(id)),
            MutationError::InsufficientFunds {
                account,
                balance,
                requested,
            } => ProcessError::InsufficientFunds {
                account,
                balance,
                requested,
            },
            MutationError::OutOfRange {
                account, requested, ..
            } => ValidationError::BalanceOutOfRange { account, requested }.into(),
            MutationError::InvariantViolation(message) => {
                ProcessError::InvariantViolation(message)
            }
            MutationError::Store(err) => ProcessError::Store(err),
        }
    }
}

impl ProcessError {
    /// Stable code for the request layer.
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::Validation(_) => "VALIDATION_ERROR",
            ProcessError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            ProcessError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ProcessError::StoreConflict { .. } => "STORE_CONFLICT",
            ProcessError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            ProcessError::NotAnOwner { .. } => "NOT_AN_OWNER",
            ProcessError::LastOwner { .. } => "LAST_OWNER",
            ProcessError::Store(_) => "STORE_ERROR",
        }
    }

    /// Nothing was changed and repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::StoreConflict { .. } => true,
            ProcessError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Expected business outcomes, as opposed to bad input or system faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProcessError::AccountNotFound(_)
                | ProcessError::InsufficientFunds { .. }
                | ProcessError::NotAnOwner { .. }
                | ProcessError::LastOwner { .. }
        )
    }
}

/// Committed result of a money operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub record: TransactionRecord,
    /// Balance of the booked account (the sender for transfers) after commit.
    pub balance: Decimal,
}

pub type Outcome = Result<Receipt, ProcessError>;

pub trait TransactionProcessor {
    /// Runs a validated operation as a single unit of work: all legs and the
    /// ledger record commit together or not at all.
    fn execute(&mut self, operation: Operation) -> Outcome;

    fn process_transaction(&mut self, request: OperationRequest) -> Outcome {
        let operation = Operation::parse(request)?;
        self.execute(operation)
    }

    fn deposit(&mut self, account: AccountId, amount: Decimal, channel: &str) -> Outcome {
        self.execute(Operation::deposit(account, amount, channel)?)
    }

    fn withdraw(&mut self, account: AccountId, amount: Decimal, channel: &str) -> Outcome {
        self.execute(Operation::withdraw(account, amount, channel)?)
    }

    fn transfer(
        &mut self,
        sender: AccountId,
        receiver: AccountNumber,
        amount: Decimal,
        channel: &str,
    ) -> Outcome {
        self.execute(Operation::transfer(sender, receiver, amount, channel)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedAccount {
    pub account: Account,
    /// Ledger records whose account reference was cleared.
    pub detached_records: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerRelease {
    pub closed: Vec<ClosedAccount>,
    pub retained: Vec<AccountId>,
}

/// Account lifecycle. Anything that removes an account detaches its ledger
/// records in the same unit of work.
pub trait AccountRegistry {
    fn open_account(
        &mut self,
        opening_balance: Decimal,
        kind: AccountKind,
        owners: &[CustomerId],
    ) -> Result<Account, ProcessError>;

    fn close_account(&mut self, account: AccountId) -> Result<ClosedAccount, ProcessError>;

    fn add_owner(
        &mut self,
        account: &AccountNumber,
        customer: CustomerId,
    ) -> Result<Account, ProcessError>;

    fn remove_owner(
        &mut self,
        account: &AccountNumber,
        customer: CustomerId,
    ) -> Result<Account, ProcessError>;

    /// Drops the customer from every account it owns. Accounts that would be
    /// left without a co-owner are closed.
    fn release_customer(&mut self, customer: CustomerId) -> Result<CustomerRelease, ProcessError>;
}
