use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    account::{AccountId, AccountNumber},
    money::{Amount, MoneyError},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(format!("unknown transaction kind `{other}`")),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw request as handed over by the request layer, before validation.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kind: TransactionKind,
    pub account: AccountId,
    pub amount: Option<Decimal>,
    pub channel: String,
    pub receiver: Option<String>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Amount is required for {kind:?}")]
    AmountRequired { kind: TransactionKind },
    #[error("Invalid amount for {kind:?}: {source}")]
    InvalidAmount {
        kind: TransactionKind,
        source: MoneyError,
    },
    #[error("Receiver account number is required for a transfer")]
    ReceiverRequired,
    #[error("{kind:?} does not take a receiver account number")]
    UnexpectedReceiver { kind: TransactionKind },
    #[error("Malformed receiver account number `{value}`")]
    MalformedReceiver { value: String },
    #[error("Amount {requested} would take the balance of account {account} out of range")]
    BalanceOutOfRange {
        account: AccountId,
        requested: Decimal,
    },
    #[error("Sender and receiver must be different accounts")]
    SelfTransfer,
    #[error("Invalid opening balance: {0}")]
    InvalidOpeningBalance(MoneyError),
    #[error("Opening balance {balance} is below the minimum balance {floor}")]
    OpeningBalanceBelowFloor { balance: Decimal, floor: Decimal },
    #[error("An account needs at least one owner")]
    NoOwners,
}

/// A validated operation, ready to run as one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Deposit {
        account: AccountId,
        amount: Amount,
        channel: String,
    },
    Withdraw {
        account: AccountId,
        amount: Amount,
        channel: String,
    },
    Transfer {
        sender: AccountId,
        receiver: AccountNumber,
        amount: Amount,
        channel: String,
    },
}

impl Operation {
    pub fn parse(request: OperationRequest) -> Result<Self, ValidationError> {
        let OperationRequest {
            kind,
            account,
            amount,
            channel,
            receiver,
        } = request;
        let amount = Self::parse_amount(kind, amount)?;
        let channel = channel.trim().to_string();
        match kind {
            TransactionKind::Deposit => {
                Self::reject_receiver(kind, receiver)?;
                Ok(Self::Deposit {
                    account,
                    amount,
                    channel,
                })
            }
            TransactionKind::Withdrawal => {
                Self::reject_receiver(kind, receiver)?;
                Ok(Self::Withdraw {
                    account,
                    amount,
                    channel,
                })
            }
            TransactionKind::Transfer => {
                let Some(receiver) = receiver.filter(|value| !value.trim().is_empty()) else {
                    return Err(ValidationError::ReceiverRequired);
                };
                let receiver = receiver
                    .parse()
                    .map_err(|_| ValidationError::MalformedReceiver { value: receiver })?;
                Ok(Self::Transfer {
                    sender: account,
                    receiver,
                    amount,
                    channel,
                })
            }
        }
    }

    pub fn deposit(
        account: AccountId,
        amount: Decimal,
        channel: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::parse(OperationRequest {
            kind: TransactionKind::Deposit,
            account,
            amount: Some(amount),
            channel: channel.into(),
            receiver: None,
        })
    }

    pub fn withdraw(
        account: AccountId,
        amount: Decimal,
        channel: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::parse(OperationRequest {
            kind: TransactionKind::Withdrawal,
            account,
            amount: Some(amount),
            channel: channel.into(),
            receiver: None,
        })
    }

    pub fn transfer(
        sender: AccountId,
        receiver: AccountNumber,
        amount: Decimal,
        channel: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let kind = TransactionKind::Transfer;
        Ok(Self::Transfer {
            sender,
            receiver,
            amount: Self::parse_amount(kind, Some(amount))?,
            channel: channel.into().trim().to_string(),
        })
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Operation::Deposit { .. } => TransactionKind::Deposit,
            Operation::Withdraw { .. } => TransactionKind::Withdrawal,
            Operation::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    /// The account the operation is booked against; the sender for transfers.
    pub fn account(&self) -> AccountId {
        match self {
            Operation::Deposit { account, .. } | Operation::Withdraw { account, .. } => *account,
            Operation::Transfer { sender, .. } => *sender,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            Operation::Deposit { amount, .. }
            | Operation::Withdraw { amount, .. }
            | Operation::Transfer { amount, .. } => *amount,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Operation::Deposit { channel, .. }
            | Operation::Withdraw { channel, .. }
            | Operation::Transfer { channel, .. } => channel,
        }
    }

    pub fn receiver(&self) -> Option<AccountNumber> {
        match self {
            Operation::Transfer { receiver, .. } => Some(*receiver),
            _ => None,
        }
    }

    fn parse_amount(
        kind: TransactionKind,
        amount: Option<Decimal>,
    ) -> Result<Amount, ValidationError> {
        let Some(amount) = amount else {
            return Err(ValidationError::AmountRequired { kind });
        };
        Amount::new(amount).map_err(|source| ValidationError::InvalidAmount { kind, source })
    }

    fn reject_receiver(
        kind: TransactionKind,
        receiver: Option<String>,
    ) -> Result<(), ValidationError> {
        match receiver {
            Some(value) if !value.trim().is_empty() => {
                Err(ValidationError::UnexpectedReceiver { kind })
            }
            _ => Ok(()),
        }
    }
}
