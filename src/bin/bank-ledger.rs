use std::fs::File;

use anyhow::{Context, Result, bail};
use bank_ledger::{
    account::{AccountId, AccountKind, AccountNumber, CustomerId},
    bin_utils::{Service, config::LedgerConfig, print_customer_accounts, print_history},
    processor::{AccountRegistry, ProcessError},
};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  bank-ledger open <balance> <individual|joint> <customer-id>...
  bank-ledger process <operations.csv>
  bank-ledger close <account-id>
  bank-ledger history <account-number>
  bank-ledger accounts <customer-id>
  bank-ledger add-owner <account-number> <customer-id>
  bank-ledger remove-owner <account-number> <customer-id>
  bank-ledger release <customer-id>";

fn init_logging() {
    // stdout carries CSV, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("Missing <{name}>\n{USAGE}"))
}

fn parse_customer(value: &str) -> Result<CustomerId> {
    value
        .parse()
        .with_context(|| format!("Invalid customer id `{value}`"))
}

fn parse_number(value: &str) -> Result<AccountNumber> {
    value
        .parse()
        .with_context(|| format!("Invalid account number `{value}`"))
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = arg(&args, 0, "command")?;
    let config = LedgerConfig::from_env()?;
    let database = config.open_database()?;
    let mut processor = config.processor(&database)?;

    match command {
        "open" => {
            let balance: Decimal = arg(&args, 1, "balance")?
                .parse()
                .context("Opening balance is not a decimal")?;
            let kind: AccountKind = arg(&args, 2, "kind")?.parse()?;
            let owners = args[3..]
                .iter()
                .map(|value| parse_customer(value))
                .collect::<Result<Vec<_>>>()?;
            let account = processor.open_account(balance, kind, &owners)?;
            println!("{},{}", account.id(), account.number());
        }
        "process" => {
            let filename = arg(&args, 1, "operations.csv")?;
            let file =
                File::open(filename).with_context(|| format!("Failed to open `{filename}`"))?;
            let service = Service {
                input: file,
                output: &mut std::io::stdout(),
                processor,
                error_printer: Box::new(|line, err: ProcessError| {
                    // insufficient funds and unknown accounts are business outcomes,
                    // the processor logs them as rejections at info level
                    if !err.is_rejection() {
                        eprintln!("Error at line {line}: [{}] {err}", err.code())
                    }
                }),
            };
            service.run()?;
        }
        "close" => {
            let value = arg(&args, 1, "account-id")?;
            let id: AccountId = value
                .parse()
                .with_context(|| format!("Invalid account id `{value}`"))?;
            let closed = processor.close_account(id)?;
            println!(
                "{},{},{}",
                closed.account.id(),
                closed.account.number(),
                closed.detached_records
            );
        }
        "history" => {
            let number = parse_number(arg(&args, 1, "account-number")?)?;
            print_history(&processor, &number, &mut std::io::stdout())?;
        }
        "accounts" => {
            let customer = parse_customer(arg(&args, 1, "customer-id")?)?;
            print_customer_accounts(&processor, customer, &mut std::io::stdout())?;
        }
        "add-owner" | "remove-owner" => {
            let number = parse_number(arg(&args, 1, "account-number")?)?;
            let customer = parse_customer(arg(&args, 2, "customer-id")?)?;
            let account = if command == "add-owner" {
                processor.add_owner(&number, customer)?
            } else {
                processor.remove_owner(&number, customer)?
            };
            let owners: Vec<String> = account.owners().iter().map(ToString::to_string).collect();
            println!("{},{}", account.number(), owners.join(" "));
        }
        "release" => {
            let customer = parse_customer(arg(&args, 1, "customer-id")?)?;
            let release = processor.release_customer(customer)?;
            for closed in &release.closed {
                println!("closed,{},{}", closed.account.id(), closed.account.number());
            }
            for id in &release.retained {
                println!("retained,{id}");
            }
        }
        other => bail!("Unknown command `{other}`\n{USAGE}"),
    }
    Ok(())
}
