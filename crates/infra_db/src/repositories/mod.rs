//! Repository implementations for the ledger tables
//!
//! Repositories encapsulate SQL queries and map database rows to plain row
//! structs; the adapters turn those into domain types.
//!
//! # Architecture
//!
//! - Runtime-checked queries (`sqlx::query_as` with `FromRow` rows)
//! - Reads that feed a write take row locks in a fixed order
//! - Writes run inside the caller's transaction

pub mod ledger;

pub use ledger::LedgerRepository;
