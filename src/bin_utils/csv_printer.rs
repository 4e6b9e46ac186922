use std::io::Write;

use crate::{
    account::{Account, AccountId, AccountKind, AccountNumber},
    command::TransactionKind,
    store::ledger::{TransactionId, TransactionRecord},
};
use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub account: AccountId,
    pub number: AccountNumber,
    pub kind: AccountKind,
    pub balance: Decimal,
}

impl From<Account> for AccountRow {
    fn from(account: Account) -> Self {
        Self {
            account: account.id(),
            number: account.number(),
            kind: account.kind(),
            balance: account.balance(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordRow {
    pub id: TransactionId,
    pub account: Option<AccountId>,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub channel: String,
    pub receiver: Option<AccountNumber>,
    pub created_at: DateTime<Utc>,
}

impl From<TransactionRecord> for RecordRow {
    fn from(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            account: record.account,
            kind: record.kind,
            amount: record.amount,
            channel: record.channel,
            receiver: record.receiver,
            created_at: record.created_at,
        }
    }
}

pub fn print_accounts<W>(
    output: &mut W,
    accounts: impl Iterator<Item = AccountRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    print_rows(output, accounts)
}

pub fn print_records<W>(
    output: &mut W,
    records: impl Iterator<Item = RecordRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    print_rows(output, records)
}

fn print_rows<W, T>(output: &mut W, rows: impl Iterator<Item = T>) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::from_utf8;

    use super::*;

    #[test]
    fn accounts_are_printed_with_a_header() {
        let number: AccountNumber = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        let mut output = Vec::new();
        print_accounts(
            &mut output,
            [AccountRow {
                account: 3,
                number,
                kind: AccountKind::Joint,
                balance: Decimal::new(250_050, 2),
            }]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(
            from_utf8(&output).unwrap(),
            "account,number,kind,balance\n\
             3,67e55044-10b1-426f-9247-bb680e5fe0c8,joint,2500.50\n"
        );
    }

    #[test]
    fn detached_records_have_an_empty_account() {
        let created_at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut output = Vec::new();
        print_records(
            &mut output,
            [RecordRow {
                id: 7,
                account: None,
                kind: TransactionKind::Deposit,
                amount: Decimal::new(1000, 2),
                channel: "cash".to_string(),
                receiver: None,
                created_at,
            }]
            .into_iter(),
        )
        .unwrap();
        let text = from_utf8(&output).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,account,type,amount,channel,receiver,created_at")
        );
        assert_eq!(lines.next(), Some("7,,deposit,10.00,cash,,2024-03-01T10:00:00Z"));
    }
}
