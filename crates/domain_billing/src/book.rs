//! The per-payer aggregate
//!
//! A [`PayerBook`] holds everything the ledger knows about one payer: their
//! invoices (with lines), discounts, standing discounts, payments, credit
//! allocations, and the cached available credit. A store session loads a book
//! under the payer's lock; every ledger operation mutates the book and records
//! what it touched in a [`ChangeSet`] so the store can persist exactly that.
//!
//! # Atomicity
//!
//! Public operations run through [`PayerBook::atomically`]: the change is made
//! on a scratch copy and swapped in only when it succeeds.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{
    CreditAllocationId, DiscountId, InvoiceId, InvoiceLineId, PayerId, PaymentId,
    StudentDiscountId,
};

use crate::allocation::CreditAllocation;
use crate::discount::{Discount, StudentDiscount};
use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::line::InvoiceLine;
use crate::payment::Payment;

/// Identifiers of rows touched since the book was loaded
///
/// A dirty invoice is persisted together with all of its lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub invoices: BTreeSet<InvoiceId>,
    pub deleted_lines: BTreeSet<InvoiceLineId>,
    pub discounts: BTreeSet<DiscountId>,
    pub deleted_discounts: BTreeSet<DiscountId>,
    pub student_discounts: BTreeSet<StudentDiscountId>,
    pub payments: BTreeSet<PaymentId>,
    pub allocations: BTreeSet<CreditAllocationId>,
    pub deleted_allocations: BTreeSet<CreditAllocationId>,
    /// The cached available credit changed
    pub payer: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self == &ChangeSet::default()
    }

    pub(crate) fn mark_invoice(&mut self, id: InvoiceId) {
        self.invoices.insert(id);
    }

    pub(crate) fn mark_line_deleted(&mut self, id: InvoiceLineId) {
        self.deleted_lines.insert(id);
    }

    pub(crate) fn mark_discount(&mut self, id: DiscountId) {
        self.discounts.insert(id);
    }

    pub(crate) fn mark_discount_deleted(&mut self, id: DiscountId) {
        self.discounts.remove(&id);
        self.deleted_discounts.insert(id);
    }

    pub(crate) fn mark_student_discount(&mut self, id: StudentDiscountId) {
        self.student_discounts.insert(id);
    }

    pub(crate) fn mark_payment(&mut self, id: PaymentId) {
        self.payments.insert(id);
    }

    pub(crate) fn mark_allocation(&mut self, id: CreditAllocationId) {
        self.allocations.insert(id);
    }

    pub(crate) fn mark_allocation_deleted(&mut self, id: CreditAllocationId) {
        self.allocations.remove(&id);
        self.deleted_allocations.insert(id);
    }
}

/// Everything the ledger holds for one payer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerBook {
    pub(crate) payer_id: PayerId,
    pub(crate) available_credit: Decimal,
    pub(crate) invoices: Vec<Invoice>,
    pub(crate) discounts: Vec<Discount>,
    pub(crate) student_discounts: Vec<StudentDiscount>,
    pub(crate) payments: Vec<Payment>,
    pub(crate) allocations: Vec<CreditAllocation>,
    pub(crate) changes: ChangeSet,
}

impl PayerBook {
    /// Creates an empty book for a payer with no history
    pub fn new(payer_id: PayerId) -> Self {
        Self {
            payer_id,
            available_credit: Decimal::ZERO,
            invoices: Vec::new(),
            discounts: Vec::new(),
            student_discounts: Vec::new(),
            payments: Vec::new(),
            allocations: Vec::new(),
            changes: ChangeSet::default(),
        }
    }

    /// Rebuilds a book from stored rows
    ///
    /// `cached_credit` is taken as stored, even if it has drifted; use
    /// [`PayerBook::reconcile`] to repair it.
    pub fn from_parts(
        payer_id: PayerId,
        cached_credit: Decimal,
        invoices: Vec<Invoice>,
        discounts: Vec<Discount>,
        student_discounts: Vec<StudentDiscount>,
        payments: Vec<Payment>,
        allocations: Vec<CreditAllocation>,
    ) -> Self {
        Self {
            payer_id,
            available_credit: cached_credit,
            invoices,
            discounts,
            student_discounts,
            payments,
            allocations,
            changes: ChangeSet::default(),
        }
    }

    /// Runs `op` against a scratch copy and keeps the result only on success
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_kernel::PayerId;
    /// use domain_billing::{BillingError, PayerBook};
    ///
    /// let mut book = PayerBook::new(PayerId::new());
    /// let result: Result<(), BillingError> = book.atomically(|b| {
    ///     b.create_invoice(domain_billing::InvoiceType::Manual, "INV-1", None, None);
    ///     Err(BillingError::validation("changed my mind"))
    /// });
    /// assert!(result.is_err());
    /// assert!(book.invoices().is_empty());
    /// ```
    pub fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut PayerBook) -> Result<T, BillingError>,
    ) -> Result<T, BillingError> {
        let mut scratch = self.clone();
        let value = op(&mut scratch)?;
        *self = scratch;
        Ok(value)
    }

    pub fn payer_id(&self) -> PayerId {
        self.payer_id
    }

    /// The cached available credit
    pub fn available_credit(&self) -> Decimal {
        self.available_credit
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn discounts(&self) -> &[Discount] {
        &self.discounts
    }

    pub fn student_discounts(&self) -> &[StudentDiscount] {
        &self.student_discounts
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn allocations(&self) -> &[CreditAllocation] {
        &self.allocations
    }

    /// Rows touched since load or the last [`PayerBook::take_changes`]
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Hands the pending changes to the store and starts a fresh change set
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    pub fn invoice(&self, id: InvoiceId) -> Result<&Invoice, BillingError> {
        self.invoices
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| BillingError::not_found("Invoice", id))
    }

    pub fn line(&self, id: InvoiceLineId) -> Result<&InvoiceLine, BillingError> {
        let (invoice_index, line_index) = self.line_position(id)?;
        Ok(&self.invoices[invoice_index].lines[line_index])
    }

    pub fn discount(&self, id: DiscountId) -> Result<&Discount, BillingError> {
        self.discounts
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| BillingError::not_found("Discount", id))
    }

    pub fn student_discount(&self, id: StudentDiscountId) -> Result<&StudentDiscount, BillingError> {
        self.student_discounts
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| BillingError::not_found("StudentDiscount", id))
    }

    pub fn payment(&self, id: PaymentId) -> Result<&Payment, BillingError> {
        self.payments
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| BillingError::not_found("Payment", id))
    }

    pub fn allocation(&self, id: CreditAllocationId) -> Result<&CreditAllocation, BillingError> {
        self.allocations
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| BillingError::not_found("CreditAllocation", id))
    }

    pub(crate) fn invoice_index(&self, id: InvoiceId) -> Result<usize, BillingError> {
        self.invoices
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| BillingError::not_found("Invoice", id))
    }

    /// Locates a line as (invoice position, line position)
    pub(crate) fn line_position(&self, id: InvoiceLineId) -> Result<(usize, usize), BillingError> {
        self.invoices
            .iter()
            .enumerate()
            .find_map(|(invoice_index, invoice)| {
                invoice
                    .lines
                    .iter()
                    .position(|l| l.id == id)
                    .map(|line_index| (invoice_index, line_index))
            })
            .ok_or_else(|| BillingError::not_found("InvoiceLine", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceType;

    #[test]
    fn test_atomically_keeps_successful_changes() {
        let mut book = PayerBook::new(PayerId::new());
        let invoice = book
            .atomically(|b| Ok(b.create_invoice(InvoiceType::Term, "INV-1", None, None)))
            .unwrap();

        assert_eq!(book.invoice(invoice.id).unwrap().invoice_number, "INV-1");
        assert!(book.changes().invoices.contains(&invoice.id));
    }

    #[test]
    fn test_atomically_discards_failed_changes() {
        let mut book = PayerBook::new(PayerId::new());
        let before = book.clone();
        let result: Result<(), BillingError> = book.atomically(|b| {
            b.create_invoice(InvoiceType::Term, "INV-1", None, None);
            Err(BillingError::invalid_state("boom"))
        });

        assert!(result.is_err());
        assert_eq!(book, before);
    }

    #[test]
    fn test_take_changes_resets() {
        let mut book = PayerBook::new(PayerId::new());
        book.create_invoice(InvoiceType::Manual, "INV-2", None, None);

        let changes = book.take_changes();
        assert_eq!(changes.invoices.len(), 1);
        assert!(book.changes().is_empty());
    }

    #[test]
    fn test_lookups_report_not_found() {
        let book = PayerBook::new(PayerId::new());
        assert!(book.invoice(InvoiceId::new()).unwrap_err().is_not_found());
        assert!(book.line(InvoiceLineId::new()).unwrap_err().is_not_found());
        assert!(book.payment(PaymentId::new()).unwrap_err().is_not_found());
    }
}
