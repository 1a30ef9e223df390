//! Domain Adapters
//!
//! Adapter implementations for the billing domain's ports, connecting them
//! to the PostgreSQL database layer.
//!
//! # Architecture
//!
//! Each adapter:
//! - Implements a domain port trait
//! - Translates between domain models and database row types
//! - Uses the repository layer for database operations
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresLedgerStore;
//! use domain_billing::LedgerStore;
//!
//! let store = PostgresLedgerStore::new(pool);
//! let payer = store.resolve_payer(EntityRef::Payment(payment_id)).await?;
//! ```

pub mod ledger;

pub use ledger::{PostgresLedgerSession, PostgresLedgerStore, PostgresNumberGenerator};
