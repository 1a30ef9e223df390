//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for the billing ledger. Fixtures are
//! consistent and predictable so unit tests can assert exact amounts.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{CatalogItemId, PayerId};
use domain_billing::{BillingKind, CatalogItemRef, NewInvoiceLine};

/// First day of the fixture school term
pub static TERM_START: Lazy<NaiveDate> =
    Lazy::new(|| NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid fixture date"));

/// Fixture for amounts used across scenarios
pub struct AmountFixtures;

impl AmountFixtures {
    /// A termly tuition fee
    pub fn tuition() -> Decimal {
        dec!(5000.00)
    }

    /// A uniform kit, payable only in full
    pub fn uniform() -> Decimal {
        dec!(1000.00)
    }

    /// A one-off admission fee
    pub fn admission() -> Decimal {
        dec!(750.00)
    }

    /// A transport fee
    pub fn transport() -> Decimal {
        dec!(1200.00)
    }

    /// An amount that does not split evenly three ways
    pub fn odd_cents() -> Decimal {
        dec!(1000.00)
    }
}

/// Fixture for dates
pub struct DateFixtures;

impl DateFixtures {
    /// Date invoices are issued on
    pub fn issue_date() -> NaiveDate {
        *TERM_START
    }

    /// Due date thirty days after issue
    pub fn due_date() -> NaiveDate {
        Self::days_after_issue(30)
    }

    /// A date after the standard due date
    pub fn overdue_check() -> NaiveDate {
        Self::days_after_issue(45)
    }

    /// Issue date plus `days`
    pub fn days_after_issue(days: u64) -> NaiveDate {
        Self::issue_date()
            .checked_add_days(chrono::Days::new(days))
            .expect("fixture date in range")
    }
}

/// Fixture for identifiers
pub struct IdFixtures;

impl IdFixtures {
    pub fn payer_id() -> PayerId {
        PayerId::new()
    }

    pub fn product() -> CatalogItemRef {
        CatalogItemRef::product(CatalogItemId::new())
    }

    pub fn kit() -> CatalogItemRef {
        CatalogItemRef::kit(CatalogItemId::new())
    }
}

/// Fixture for ready-made invoice lines
pub struct LineFixtures;

impl LineFixtures {
    /// Tuition, payable in instalments
    pub fn tuition(price: Decimal) -> NewInvoiceLine {
        NewInvoiceLine::new(IdFixtures::product(), "Tuition", BillingKind::Tuition, price)
    }

    /// Uniform kit, payable only in full
    pub fn uniform(price: Decimal) -> NewInvoiceLine {
        NewInvoiceLine::new(IdFixtures::kit(), "Uniform kit", BillingKind::Uniform, price)
            .must_pay_in_full(true)
    }

    /// Admission fee, payable only in full
    pub fn admission(price: Decimal) -> NewInvoiceLine {
        NewInvoiceLine::new(IdFixtures::product(), "Admission fee", BillingKind::Admission, price)
            .must_pay_in_full(true)
    }

    /// Transport, payable in instalments
    pub fn transport(price: Decimal) -> NewInvoiceLine {
        NewInvoiceLine::new(IdFixtures::product(), "Transport", BillingKind::Transport, price)
    }
}

static DOCUMENT_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

/// Fixture for document numbers
pub struct StringFixtures;

impl StringFixtures {
    /// A process-wide unique invoice number
    ///
    /// Uses its own prefix so it never collides with generated numbers when
    /// fixtures and the number generator share a database.
    pub fn next_invoice_number() -> String {
        format!("TEST-INV-{:06}", DOCUMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }

    /// A process-wide unique receipt number
    pub fn next_receipt_number() -> String {
        format!("TEST-RCP-{:06}", DOCUMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }


    pub fn invoice_number(sequence: usize) -> String {
        format!("INV-2026-{:06}", sequence)
    }

    pub fn receipt_number(sequence: usize) -> String {
        format!("RCP-2026-{:06}", sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dates_are_ordered() {
        assert!(DateFixtures::issue_date() < DateFixtures::due_date());
        assert!(DateFixtures::due_date() < DateFixtures::overdue_check());
    }

    #[test]
    fn test_line_fixtures_carry_full_payment_flag() {
        assert!(LineFixtures::uniform(dec!(10)).must_pay_in_full);
        assert!(LineFixtures::admission(dec!(10)).must_pay_in_full);
        assert!(!LineFixtures::tuition(dec!(10)).must_pay_in_full);
    }

    #[test]
    fn test_document_numbers() {
        assert_eq!(StringFixtures::invoice_number(7), "INV-2026-000007");
        assert_eq!(StringFixtures::receipt_number(12), "RCP-2026-000012");
    }

    #[test]
    fn test_next_numbers_are_unique() {
        let a = StringFixtures::next_invoice_number();
        let b = StringFixtures::next_invoice_number();
        assert_ne!(a, b);
        assert!(StringFixtures::next_receipt_number().starts_with("TEST-RCP-"));
    }
}
