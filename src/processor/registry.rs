use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    account::{Account, AccountId, AccountKind, AccountNumber, CustomerId},
    command::ValidationError,
    money::to_minor_units,
    store::{
        accounts::{self, AccountResolver},
        ledger,
    },
};

use super::{
    AccountRef, AccountRegistry, ClosedAccount, CustomerRelease, ProcessError,
    sqlite_processor::SqliteTransactionProcessor,
};

/// Detaches the ledger records first, then deletes the row. Both happen in
/// the caller's unit, so either both are visible or neither is.
fn close_in_unit(unit: &Connection, account: Account) -> Result<ClosedAccount, ProcessError> {
    let detached_records = ledger::detach_account(unit, account.id())?;
    if !accounts::delete(unit, account.id())? {
        return Err(ProcessError::AccountNotFound(AccountRef::Id(account.id())));
    }
    Ok(ClosedAccount {
        account,
        detached_records,
    })
}

fn require_by_number(unit: &Connection, number: &AccountNumber) -> Result<Account, ProcessError> {
    unit.resolve_by_number(number)?
        .ok_or(ProcessError::AccountNotFound(AccountRef::Number(*number)))
}

impl AccountRegistry for SqliteTransactionProcessor {
    fn open_account(
        &mut self,
        opening_balance: Decimal,
        kind: AccountKind,
        owners: &[CustomerId],
    ) -> Result<Account, ProcessError> {
        let mut owners = owners.to_vec();
        owners.sort_unstable();
        owners.dedup();
        if owners.is_empty() {
            return Err(ValidationError::NoOwners.into());
        }
        let opening =
            to_minor_units(opening_balance).map_err(ValidationError::InvalidOpeningBalance)?;
        if opening < self.engine().floor_minor_units() {
            return Err(ValidationError::OpeningBalanceBelowFloor {
                balance: opening_balance,
                floor: self.engine().min_balance(),
            }
            .into());
        }

        let account = self.run_unit("open_account", |unit, _| {
            Ok(accounts::insert(unit, opening, kind, &owners)?)
        })?;
        info!(
            account = account.id(),
            number = %account.number(),
            kind = %account.kind(),
            balance = %account.balance(),
            "account opened"
        );
        Ok(account)
    }

    fn close_account(&mut self, account: AccountId) -> Result<ClosedAccount, ProcessError> {
        let closed = self.run_unit("close_account", |unit, _| {
            let found = unit
                .resolve_by_id(account)?
                .ok_or(ProcessError::AccountNotFound(AccountRef::Id(account)))?;
            close_in_unit(unit, found)
        })?;
        info!(
            account,
            number = %closed.account.number(),
            detached = closed.detached_records,
            "account closed"
        );
        Ok(closed)
    }

    fn add_owner(
        &mut self,
        account: &AccountNumber,
        customer: CustomerId,
    ) -> Result<Account, ProcessError> {
        self.run_unit("add_owner", |unit, _| {
            let found = require_by_number(unit, account)?;
            if accounts::add_owner(unit, found.id(), customer)? {
                info!(%account, customer, "owner added");
            }
            require_by_number(unit, account)
        })
    }

    fn remove_owner(
        &mut self,
        account: &AccountNumber,
        customer: CustomerId,
    ) -> Result<Account, ProcessError> {
        self.run_unit("remove_owner", |unit, _| {
            let found = require_by_number(unit, account)?;
            if !found.is_owned_by(customer) {
                return Err(ProcessError::NotAnOwner {
                    account: *account,
                    customer,
                });
            }
            if found.owners().len() <= 1 {
                return Err(ProcessError::LastOwner { account: *account });
            }
            accounts::remove_owner(unit, found.id(), customer)?;
            info!(%account, customer, "owner removed");
            require_by_number(unit, account)
        })
    }

    fn release_customer(&mut self, customer: CustomerId) -> Result<CustomerRelease, ProcessError> {
        let release = self.run_unit("release_customer", |unit, _| {
            let mut release = CustomerRelease::default();
            for account in accounts::owned_by(unit, customer)? {
                if account.survives_release_of(customer) {
                    accounts::remove_owner(unit, account.id(), customer)?;
                    release.retained.push(account.id());
                } else {
                    release.closed.push(close_in_unit(unit, account)?);
                }
            }
            Ok(release)
        })?;
        info!(
            customer,
            closed = release.closed.len(),
            retained = release.retained.len(),
            "customer released"
        );
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;
    use crate::{
        command::TransactionKind,
        engine::MutationEngine,
        money::MoneyError,
        processor::TransactionProcessor,
        store::open_in_memory,
    };

    fn dec(value: u32) -> Decimal {
        Decimal::from_u32(value).unwrap()
    }

    fn processor() -> SqliteTransactionProcessor {
        SqliteTransactionProcessor::new(open_in_memory().unwrap(), MutationEngine::default())
    }

    #[test]
    fn open_account_validation() {
        let mut processor = processor();

        let err = processor
            .open_account(dec(5000), AccountKind::Individual, &[])
            .unwrap_err();
        assert!(matches!(err, ProcessError::Validation(ValidationError::NoOwners)));

        let err = processor
            .open_account(dec(1999), AccountKind::Individual, &[1])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Opening balance 1999 is below the minimum balance 2000.00"
        );

        let err = processor
            .open_account(Decimal::new(2_000_001, 3), AccountKind::Individual, &[1])
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Validation(ValidationError::InvalidOpeningBalance(
                MoneyError::TooPrecise(_)
            ))
        ));

        let account = processor
            .open_account(dec(2000), AccountKind::Joint, &[2, 1, 2])
            .unwrap();
        assert_eq!(account.owners(), &[1, 2]);
        assert_eq!(processor.accounts().unwrap(), vec![account]);
    }

    #[test]
    fn closing_an_account_keeps_its_records() {
        let mut processor = processor();
        let account = processor
            .open_account(dec(5000), AccountKind::Individual, &[1])
            .unwrap();
        let other = processor
            .open_account(dec(5000), AccountKind::Individual, &[2])
            .unwrap();
        let deposit = processor.deposit(account.id(), dec(10), "cash").unwrap();
        let sent = processor
            .transfer(other.id(), account.number(), dec(10), "neft")
            .unwrap();

        let closed = processor.close_account(account.id()).unwrap();
        assert_eq!(closed.detached_records, 1);
        assert_eq!(closed.account.number(), account.number());
        assert_eq!(processor.transaction_count().unwrap(), 2);

        let record = processor.find_transaction(deposit.record.id).unwrap().unwrap();
        assert_eq!(record.account, None);
        assert_eq!(record.kind, TransactionKind::Deposit);
        // the transfer was booked against the sender, it keeps its reference
        let record = processor.find_transaction(sent.record.id).unwrap().unwrap();
        assert_eq!(record.account, Some(other.id()));

        assert!(matches!(
            processor.account_by_id(account.id()).unwrap_err(),
            ProcessError::AccountNotFound(_)
        ));
        assert!(matches!(
            processor.close_account(account.id()).unwrap_err(),
            ProcessError::AccountNotFound(AccountRef::Id(_))
        ));
    }

    #[test]
    fn owners_can_be_added_and_removed() {
        let mut processor = processor();
        let account = processor
            .open_account(dec(5000), AccountKind::Joint, &[1])
            .unwrap();
        let number = account.number();

        let account = processor.add_owner(&number, 2).unwrap();
        assert_eq!(account.owners(), &[1, 2]);

        let err = processor.remove_owner(&number, 3).unwrap_err();
        assert!(matches!(err, ProcessError::NotAnOwner { customer: 3, .. }));

        let account = processor.remove_owner(&number, 1).unwrap();
        assert_eq!(account.owners(), &[2]);

        let err = processor.remove_owner(&number, 2).unwrap_err();
        assert!(matches!(err, ProcessError::LastOwner { .. }));
        assert_eq!(processor.account_by_number(&number).unwrap().owners(), &[2]);

        let err = processor.add_owner(&AccountNumber::mint(), 2).unwrap_err();
        assert!(matches!(err, ProcessError::AccountNotFound(AccountRef::Number(_))));
    }

    #[test]
    fn releasing_a_customer_keeps_shared_joint_accounts() {
        let mut processor = processor();
        let own = processor
            .open_account(dec(5000), AccountKind::Individual, &[1])
            .unwrap();
        let shared = processor
            .open_account(dec(5000), AccountKind::Joint, &[1, 2])
            .unwrap();
        let sole_joint = processor
            .open_account(dec(5000), AccountKind::Joint, &[1])
            .unwrap();
        let unrelated = processor
            .open_account(dec(5000), AccountKind::Individual, &[3])
            .unwrap();
        processor.withdraw(own.id(), dec(100), "atm").unwrap();
        processor.withdraw(shared.id(), dec(100), "atm").unwrap();

        let release = processor.release_customer(1).unwrap();
        let closed: Vec<AccountId> = release
            .closed
            .iter()
            .map(|closed| closed.account.id())
            .collect();
        assert_eq!(closed, vec![own.id(), sole_joint.id()]);
        assert_eq!(release.closed[0].detached_records, 1);
        assert_eq!(release.retained, vec![shared.id()]);

        let remaining: Vec<AccountId> = processor
            .accounts()
            .unwrap()
            .iter()
            .map(Account::id)
            .collect();
        assert_eq!(remaining, vec![shared.id(), unrelated.id()]);
        assert_eq!(processor.account_by_id(shared.id()).unwrap().owners(), &[2]);
        // the surviving account keeps its history attached
        let history = processor.transactions_for_account(&shared.number()).unwrap();
        assert_eq!(history[0].account, Some(shared.id()));
        assert_eq!(processor.transaction_count().unwrap(), 2);
    }
}
