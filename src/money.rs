use std::fmt;

use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

/// Balances and amounts are persisted as whole minor units (cents).
pub type MinorUnits = i64;

/// Decimal places of the ledger currency.
pub const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Amount must be greater than zero, got {0}")]
    NotPositive(Decimal),
    #[error("Amount {0} has more than {CURRENCY_SCALE} decimal places")]
    TooPrecise(Decimal),
    #[error("Amount {0} is out of range")]
    OutOfRange(Decimal),
}

/// Converts a decimal value into minor units, refusing anything that would
/// need rounding.
pub fn to_minor_units(value: Decimal) -> Result<MinorUnits, MoneyError> {
    if value.normalize().scale() > CURRENCY_SCALE {
        return Err(MoneyError::TooPrecise(value));
    }
    let factor = Decimal::from(10_i64.pow(CURRENCY_SCALE));
    value
        .checked_mul(factor)
        .and_then(|scaled| scaled.to_i64())
        .ok_or(MoneyError::OutOfRange(value))
}

pub fn from_minor_units(minor: MinorUnits) -> Decimal {
    Decimal::new(minor, CURRENCY_SCALE)
}

/// A strictly positive amount of money that fits the currency scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    value: Decimal,
    minor: MinorUnits,
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NotPositive(value));
        }
        let minor = to_minor_units(value)?;
        Ok(Self {
            value: from_minor_units(minor),
            minor,
        })
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn minor_units(&self) -> MinorUnits {
        self.minor
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}
