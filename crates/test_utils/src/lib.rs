//! Shared helpers for the billing ledger test suites
//!
//! - `fixtures`: fixed amounts, dates, ids, ready-made lines, unique document numbers
//! - `builders`: fluent builders that drive real `PayerBook` operations
//! - `assertions`: checks for the ledger's derived-field and credit invariants
//! - `generators`: proptest strategies for amounts, weights, and books
//! - `database`: migrated PostgreSQL containers for store tests

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
