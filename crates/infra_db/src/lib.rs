//! Infrastructure Database Layer
//!
//! This crate persists the billing ledger in PostgreSQL using SQLx.
//!
//! # Architecture
//!
//! - `repositories` holds the SQL and row types
//! - `adapters` implements the domain's `LedgerStore` and `NumberGenerator`
//!   ports on top of them
//! - `pool` builds the connection pool and applies migrations
//!
//! # Transactions
//!
//! A ledger session is one database transaction. It locks the payer row
//! first, so two sessions for the same payer run one after the other, and
//! writes back only the rows the domain marked as changed.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{DatabaseConfig, create_pool, run_migrations, PostgresLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::from_env()?).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresLedgerStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{DatabasePool, create_pool, create_pool_from_url, run_migrations, DatabaseConfig};
pub use error::DatabaseError;
pub use adapters::{PostgresLedgerSession, PostgresLedgerStore, PostgresNumberGenerator};
