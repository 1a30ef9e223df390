//! Core Kernel - Foundational types shared by the billing ledger
//!
//! This crate provides the building blocks used by every other crate:
//! - Money utilities with exact decimal rounding and proportional splitting
//! - Strongly-typed identifiers for ledger entities
//! - Port infrastructure for store and collaborator adapters
//! - A shared error type for cross-cutting failures

pub mod error;
pub mod money;
pub mod identifiers;
pub mod ports;

pub use error::CoreError;
pub use money::{MoneyError, round2, split_proportional, percentage_of};
pub use identifiers::{
    PayerId, CatalogItemId, BillingPeriodId, InvoiceId, InvoiceLineId,
    DiscountId, StudentDiscountId, PaymentId, CreditAllocationId,
};
pub use ports::{
    PortError, DomainPort, AdapterHealth, HealthCheckable, HealthCheckResult,
    OperationMetadata,
};
