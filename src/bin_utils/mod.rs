//! This module could be a separate crate on its own, to bootstrap [`bank_ledger`] within a
//! binary, but the integration tests drive it directly, so it lives in the library.

use std::io::{Read, Write};

use crate::{
    account::{AccountNumber, CustomerId},
    processor::{ProcessError, TransactionProcessor, sqlite_processor::SqliteTransactionProcessor},
};
use anyhow::{Context, Result};
use csv_parser::CsvOperationParser;
use csv_printer::{AccountRow, RecordRow, print_accounts, print_records};
use tracing::info;

pub mod config;
pub mod csv_parser;
pub mod csv_printer;

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub processor: SqliteTransactionProcessor,
    pub error_printer: Box<dyn FnMut(u64, ProcessError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    /// Applies every row of the input in order, then prints all accounts.
    /// Rejected operations go to the error printer; a row that cannot be
    /// parsed stops the run.
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);

        let (mut committed, mut failed) = (0u64, 0u64);
        for (line, row) in parser {
            let row = row.with_context(|| format!("Malformed operation at line {line}"))?;
            match self.processor.process_transaction(row.into()) {
                Ok(_) => committed += 1,
                Err(err) => {
                    failed += 1;
                    (self.error_printer)(line, err);
                }
            }
        }
        info!(committed, failed, "batch processed");

        print_accounts(
            self.output,
            self.processor.accounts()?.into_iter().map(AccountRow::from),
        )
    }
}

/// Prints every account the customer owns, alone or jointly.
pub fn print_customer_accounts<W>(
    processor: &SqliteTransactionProcessor,
    customer: CustomerId,
    output: &mut W,
) -> Result<()>
where
    W: Write,
{
    let accounts = processor.accounts_of(customer)?;
    print_accounts(output, accounts.into_iter().map(AccountRow::from))
}

/// Prints the ledger records an account took part in, oldest first.
pub fn print_history<W>(
    processor: &SqliteTransactionProcessor,
    number: &AccountNumber,
    output: &mut W,
) -> Result<()>
where
    W: Write,
{
    let records = processor.transactions_for_account(number)?;
    print_records(output, records.into_iter().map(RecordRow::from))
}
