//! Billing Domain - Payer Credit Ledger
//!
//! This crate keeps the money side of school fees: invoices made of fee
//! lines, discounts on those lines, payments received from payers, and the
//! credit allocations that tie payments to lines.
//!
//! # Money flow
//!
//! - A completed payment adds to the payer's available credit
//! - Credit is allocated to invoice lines, by hand or automatically
//! - Each allocation raises a line's paid amount and lowers its remaining amount
//! - Invoice totals and status are always derived from their lines
//!
//! Available credit is cached per payer and can always be recomputed as
//! completed payments minus allocations; [`PayerBook::reconcile`] repairs drift.
//!
//! # Concurrency
//!
//! All state for one payer lives in a [`PayerBook`]. A [`LedgerStore`] hands
//! out one session per payer at a time, so operations on the same payer run
//! one after another and operations on different payers never contend.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingService, InMemoryLedgerStore};
//!
//! let payment = service
//!     .create_payment(payer_id, dec!(100.00), PaymentMethod::Cash, today, None, &meta)
//!     .await?;
//! let completion = service.complete_payment(payment.id, &meta).await?;
//! println!("allocated {}", completion.allocation.total_allocated);
//! ```

pub mod error;
pub mod line;
pub mod invoice;
pub mod book;
pub mod discount;
pub mod payment;
pub mod allocation;
pub mod balance;
pub mod ports;
pub mod config;
pub mod store;
pub mod service;

pub use error::BillingError;
pub use line::{BillingKind, CatalogItemKind, CatalogItemRef, InvoiceLine, NewInvoiceLine};
pub use invoice::{Invoice, InvoiceStatus, InvoiceType};
pub use book::{ChangeSet, PayerBook};
pub use discount::{Discount, DiscountValueType, StudentDiscount};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use allocation::{AllocationOutcome, CreditAllocation};
pub use balance::{PayerStatement, Reconciliation};
pub use ports::{AuditEntry, AuditSink, EntityRef, LedgerSession, LedgerStore, NumberGenerator};
pub use config::BillingConfig;
pub use store::{
    InMemoryLedgerStore, InMemorySession, RecordingAuditSink, SequentialNumberGenerator,
    TracingAuditSink,
};
pub use service::{BillingService, PaymentCompletion};
