use std::io::Read;

use crate::{
    account::AccountId,
    command::{OperationRequest, TransactionKind},
};
use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct OperationRow {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub account: AccountId,
    pub amount: Option<Decimal>,
    pub channel: Option<String>,
    pub receiver: Option<String>,
}

impl From<OperationRow> for OperationRequest {
    fn from(row: OperationRow) -> Self {
        OperationRequest {
            kind: row.kind,
            account: row.account,
            amount: row.amount,
            channel: row.channel.unwrap_or_default(),
            receiver: row.receiver,
        }
    }
}

/// Parses an operation list in CSV format, yielding each row with the line
/// it started on.
pub struct CsvOperationParser<R> {
    iter: DeserializeRecordsIntoIter<R, OperationRow>,
}

impl<R> CsvOperationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvOperationParser<R>
where
    R: Read,
{
    type Item = (u64, csv::Result<OperationRow>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    #[test]
    fn parse_rows() {
        let input = "type, account, amount, channel, receiver
deposit, 1, 10.5, cash,
withdrawal, 2, 3
transfer, 1, 100, neft, 67e55044-10b1-426f-9247-bb680e5fe0c8
";
        let rows: Vec<_> = CsvOperationParser::new(input.as_bytes())
            .map(|(line, row)| (line, row.unwrap()))
            .collect();
        assert_eq!(rows.len(), 3);

        let (line, deposit) = &rows[0];
        assert_eq!(*line, 2);
        assert_eq!(deposit.kind, TransactionKind::Deposit);
        assert_eq!(deposit.amount, Some(Decimal::new(105, 1)));
        assert_eq!(deposit.channel.as_deref(), Some("cash"));
        assert_eq!(deposit.receiver, None);

        let (_, withdrawal) = &rows[1];
        assert_eq!(withdrawal.amount, Some(Decimal::from_u32(3).unwrap()));
        assert_eq!(withdrawal.channel, None);

        let (line, transfer) = &rows[2];
        assert_eq!(*line, 4);
        assert_eq!(
            transfer.receiver.as_deref(),
            Some("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
    }

    #[test]
    fn malformed_rows_are_reported() {
        let input = "type,account,amount,channel,receiver
refund,1,10,cash,
";
        let mut parser = CsvOperationParser::new(input.as_bytes());
        let (line, row) = parser.next().unwrap();
        assert_eq!(line, 2);
        assert!(row.is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn rows_become_requests() {
        let request = OperationRequest::from(OperationRow {
            kind: TransactionKind::Withdrawal,
            account: 9,
            amount: None,
            channel: None,
            receiver: None,
        });
        assert_eq!(request.account, 9);
        assert_eq!(request.channel, "");
    }
}
