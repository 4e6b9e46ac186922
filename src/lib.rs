/// Monetary amounts and their integer minor-unit representation.
pub mod money;

/// Account snapshot types, identifiers and the minimum balance floor.
pub mod account;

/// Operation requests and their validation into executable [`command::Operation`]s.
pub mod command;

/// SQLite-backed durable store: balances, account rows and the transaction ledger.
/// Every balance change goes through [`store::balance::apply_delta`].
pub mod store;

/// Debit and credit legs with the minimum balance check.
pub mod engine;

/// Transaction processor interface, plus the SQLite implementation.
/// Runs each operation as one atomic unit and writes its ledger record.
///
/// NOTE: Account lifecycle operations live here as well, because closing an
/// account has to detach its ledger records in the same unit of work.
pub mod processor;

/// Ideally, this module should exist in its own crate, as a way to
/// bootstrap core logic. However, it is used by the integration tests
/// so it stays here.
pub mod bin_utils;
