use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::money::MinorUnits;

pub type AccountId = i64;

pub type CustomerId = i64;

/// Floor every debit has to respect. Credits are never checked against it.
pub const MIN_BALANCE: Decimal = Decimal::from_parts(200_000, 0, 0, false, 2);

/// [`MIN_BALANCE`] expressed in minor units.
pub const MIN_BALANCE_MINOR_UNITS: MinorUnits = 200_000;

/// Publicly shareable account reference, minted once when the account is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(Uuid);

impl AccountNumber {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AccountNumber {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Individual,
    Joint,
}

#[derive(Debug, Error)]
#[error("Unknown account kind `{0}`")]
pub struct UnknownAccountKind(pub String);

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Individual => "individual",
            AccountKind::Joint => "joint",
        }
    }
}

impl FromStr for AccountKind {
    type Err = UnknownAccountKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" => Ok(AccountKind::Individual),
            "joint" => Ok(AccountKind::Joint),
            _ => Err(UnknownAccountKind(s.to_string())),
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an account row as read inside a unit of work.
/// The balance is only ever changed by the mutation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    id: AccountId,
    number: AccountNumber,
    balance: Decimal,
    kind: AccountKind,
    owners: Vec<CustomerId>,
    opened_at: DateTime<Utc>,
}

impl Account {
    pub(crate) fn new(
        id: AccountId,
        number: AccountNumber,
        balance: Decimal,
        kind: AccountKind,
        owners: Vec<CustomerId>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            balance,
            kind,
            owners,
            opened_at,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn number(&self) -> AccountNumber {
        self.number
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn owners(&self) -> &[CustomerId] {
        &self.owners
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_owned_by(&self, customer: CustomerId) -> bool {
        self.owners.contains(&customer)
    }

    /// Whether the account stays open when `customer` gives up ownership.
    /// Only joint accounts with another owner left survive.
    pub fn survives_release_of(&self, customer: CustomerId) -> bool {
        self.kind == AccountKind::Joint && self.owners.iter().any(|owner| *owner != customer)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    fn account(kind: AccountKind, owners: Vec<CustomerId>) -> Account {
        Account::new(
            1,
            AccountNumber::mint(),
            Decimal::from_u32(5000).unwrap(),
            kind,
            owners,
            Utc::now(),
        )
    }

    #[test]
    fn min_balance_constants_agree() {
        assert_eq!(MIN_BALANCE, Decimal::from_u32(2000).unwrap());
        assert_eq!(
            crate::money::to_minor_units(MIN_BALANCE).unwrap(),
            MIN_BALANCE_MINOR_UNITS
        );
    }

    #[test]
    fn account_number_round_trips_through_text() {
        let number = AccountNumber::mint();
        let parsed: AccountNumber = number.to_string().parse().unwrap();
        assert_eq!(parsed, number);
        assert!("not-a-uuid".parse::<AccountNumber>().is_err());
    }

    #[test]
    fn parse_account_kind() {
        assert_eq!("joint".parse::<AccountKind>().unwrap(), AccountKind::Joint);
        assert_eq!(
            " Individual ".parse::<AccountKind>().unwrap(),
            AccountKind::Individual
        );
        let err = "savings".parse::<AccountKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown account kind `savings`");
    }

    #[test]
    fn release_policy() {
        let individual = account(AccountKind::Individual, vec![7]);
        assert!(individual.is_owned_by(7));
        assert!(!individual.survives_release_of(7));

        let joint = account(AccountKind::Joint, vec![7, 8]);
        assert!(joint.survives_release_of(7));

        // a joint account whose last owner leaves is closed like any other
        let last_owner = account(AccountKind::Joint, vec![7]);
        assert!(!last_owner.survives_release_of(7));
    }
}
