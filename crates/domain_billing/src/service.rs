//! Billing service
//!
//! Entry point for callers. Every operation opens one store session for the
//! payer involved, runs the ledger change on that payer's book, commits, and
//! only then writes the audit entry. Operations keyed by a line, discount,
//! payment or allocation id first ask the store which payer owns the entity.
//!
//! Nothing is retried here; a failed call leaves the ledger untouched and may
//! be repeated from scratch.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use core_kernel::{
    BillingPeriodId, CreditAllocationId, DiscountId, InvoiceId, InvoiceLineId,
    OperationMetadata, PayerId, PaymentId, StudentDiscountId,
};

use crate::allocation::{AllocationOutcome, CreditAllocation};
use crate::balance::{PayerStatement, Reconciliation};
use crate::book::PayerBook;
use crate::config::BillingConfig;
use crate::discount::{Discount, DiscountValueType, StudentDiscount};
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceType};
use crate::line::{BillingKind, InvoiceLine, NewInvoiceLine};
use crate::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::ports::{AuditEntry, AuditSink, EntityRef, LedgerSession, LedgerStore, NumberGenerator};

/// A completed payment and what auto-allocation did with it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentCompletion {
    pub payment: Payment,
    pub allocation: AllocationOutcome,
}

/// Application service over the billing ledger
pub struct BillingService<S: LedgerStore> {
    store: Arc<S>,
    numbers: Arc<dyn NumberGenerator>,
    audit: Arc<dyn AuditSink>,
    config: BillingConfig,
}

impl<S: LedgerStore> BillingService<S> {
    /// Creates a service over the given store and collaborators
    ///
    /// # Arguments
    ///
    /// * `store` - Where payer books live
    /// * `numbers` - Issues invoice and receipt numbers
    /// * `audit` - Receives an entry after every committed change
    /// * `config` - Payment terms and number prefixes
    pub fn new(
        store: Arc<S>,
        numbers: Arc<dyn NumberGenerator>,
        audit: Arc<dyn AuditSink>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            numbers,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ========================================================================
    // Invoices
    // ========================================================================

    /// Creates a draft invoice with a freshly generated number
    #[instrument(skip(self, notes, meta), fields(payer_id = %payer_id))]
    pub async fn create_invoice(
        &self,
        payer_id: PayerId,
        invoice_type: InvoiceType,
        billing_period_id: Option<BillingPeriodId>,
        notes: Option<String>,
        meta: &OperationMetadata,
    ) -> Result<Invoice, BillingError> {
        let number = self
            .numbers
            .generate(&self.config.invoice_prefix, today().year())
            .await?;

        let invoice = self
            .in_session(payer_id, |book| {
                Ok(book.create_invoice(invoice_type, number, billing_period_id, notes))
            })
            .await?;

        self.audit(
            AuditEntry::new("invoice.created", "Invoice", invoice.id).with_new_values(to_json(&invoice)),
            meta,
        )
        .await;
        Ok(invoice)
    }

    /// Adds a line to a draft invoice, applying standing discounts
    #[instrument(skip(self, new, meta), fields(invoice_id = %invoice_id))]
    pub async fn add_line(
        &self,
        invoice_id: InvoiceId,
        new: NewInvoiceLine,
        meta: &OperationMetadata,
    ) -> Result<InvoiceLine, BillingError> {
        let payer_id = self.owner(EntityRef::Invoice(invoice_id)).await?;
        let line = self
            .in_session(payer_id, |book| book.add_line(invoice_id, new))
            .await?;

        self.audit(
            AuditEntry::new("invoice_line.added", "InvoiceLine", line.id).with_new_values(to_json(&line)),
            meta,
        )
        .await;
        Ok(line)
    }

    /// Removes a line from a draft invoice
    #[instrument(skip(self, meta), fields(line_id = %line_id))]
    pub async fn remove_line(
        &self,
        line_id: InvoiceLineId,
        meta: &OperationMetadata,
    ) -> Result<InvoiceLine, BillingError> {
        let payer_id = self.owner(EntityRef::Line(line_id)).await?;
        let line = self
            .in_session(payer_id, |book| book.remove_line(line_id))
            .await?;

        self.audit(
            AuditEntry::new("invoice_line.removed", "InvoiceLine", line_id).with_old_values(to_json(&line)),
            meta,
        )
        .await;
        Ok(line)
    }

    /// Issues a draft invoice, today, due on `due_date` or after the default term
    #[instrument(skip(self, meta), fields(invoice_id = %invoice_id))]
    pub async fn issue_invoice(
        &self,
        invoice_id: InvoiceId,
        due_date: Option<NaiveDate>,
        meta: &OperationMetadata,
    ) -> Result<Invoice, BillingError> {
        let payer_id = self.owner(EntityRef::Invoice(invoice_id)).await?;
        let default_due_days = self.config.default_due_days;
        let invoice = self
            .in_session(payer_id, |book| {
                book.issue_invoice(invoice_id, today(), due_date, default_due_days)
            })
            .await?;

        self.audit(
            AuditEntry::new("invoice.issued", "Invoice", invoice_id).with_new_values(to_json(&invoice)),
            meta,
        )
        .await;
        Ok(invoice)
    }

    /// Cancels an unpaid draft or issued invoice
    #[instrument(skip(self, meta), fields(invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        invoice_id: InvoiceId,
        meta: &OperationMetadata,
    ) -> Result<Invoice, BillingError> {
        let payer_id = self.owner(EntityRef::Invoice(invoice_id)).await?;
        let invoice = self
            .in_session(payer_id, |book| book.cancel_invoice(invoice_id))
            .await?;

        info!(invoice_id = %invoice_id, "Invoice cancelled");
        self.audit(AuditEntry::new("invoice.cancelled", "Invoice", invoice_id), meta)
            .await;
        Ok(invoice)
    }

    // ========================================================================
    // Discounts
    // ========================================================================

    /// Applies a discount to a line
    #[instrument(skip(self, reason, meta), fields(line_id = %line_id))]
    pub async fn apply_discount(
        &self,
        line_id: InvoiceLineId,
        value_type: DiscountValueType,
        value: Decimal,
        reason: Option<String>,
        meta: &OperationMetadata,
    ) -> Result<Discount, BillingError> {
        let payer_id = self.owner(EntityRef::Line(line_id)).await?;
        let discount = self
            .in_session(payer_id, |book| book.apply_discount(line_id, value_type, value, reason))
            .await?;

        self.audit(
            AuditEntry::new("discount.applied", "Discount", discount.id).with_new_values(to_json(&discount)),
            meta,
        )
        .await;
        Ok(discount)
    }

    /// Removes a discount, restoring the line
    #[instrument(skip(self, meta), fields(discount_id = %discount_id))]
    pub async fn remove_discount(
        &self,
        discount_id: DiscountId,
        meta: &OperationMetadata,
    ) -> Result<Discount, BillingError> {
        let payer_id = self.owner(EntityRef::Discount(discount_id)).await?;
        let discount = self
            .in_session(payer_id, |book| book.remove_discount(discount_id))
            .await?;

        self.audit(
            AuditEntry::new("discount.removed", "Discount", discount_id).with_old_values(to_json(&discount)),
            meta,
        )
        .await;
        Ok(discount)
    }

    /// Registers a standing discount for a payer
    #[instrument(skip(self, reason, meta), fields(payer_id = %payer_id))]
    pub async fn add_student_discount(
        &self,
        payer_id: PayerId,
        billing_kind: Option<BillingKind>,
        value_type: DiscountValueType,
        value: Decimal,
        reason: Option<String>,
        meta: &OperationMetadata,
    ) -> Result<StudentDiscount, BillingError> {
        let rule = self
            .in_session(payer_id, |book| {
                book.add_student_discount(billing_kind, value_type, value, reason)
            })
            .await?;

        self.audit(
            AuditEntry::new("student_discount.created", "StudentDiscount", rule.id)
                .with_new_values(to_json(&rule)),
            meta,
        )
        .await;
        Ok(rule)
    }

    /// Deactivates a standing discount
    #[instrument(skip(self, meta), fields(student_discount_id = %id))]
    pub async fn deactivate_student_discount(
        &self,
        id: StudentDiscountId,
        meta: &OperationMetadata,
    ) -> Result<StudentDiscount, BillingError> {
        let payer_id = self.owner(EntityRef::StudentDiscount(id)).await?;
        let rule = self
            .in_session(payer_id, |book| book.deactivate_student_discount(id))
            .await?;

        self.audit(
            AuditEntry::new("student_discount.deactivated", "StudentDiscount", id),
            meta,
        )
        .await;
        Ok(rule)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Records a pending payment
    #[instrument(skip(self, reference, meta), fields(payer_id = %payer_id, amount = %amount))]
    pub async fn create_payment(
        &self,
        payer_id: PayerId,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
        reference: Option<String>,
        meta: &OperationMetadata,
    ) -> Result<Payment, BillingError> {
        let payment = self
            .in_session(payer_id, |book| {
                book.create_payment(amount, method, payment_date, reference)
            })
            .await?;

        self.audit(
            AuditEntry::new("payment.created", "Payment", payment.id).with_new_values(to_json(&payment)),
            meta,
        )
        .await;
        Ok(payment)
    }

    /// Completes a pending payment and auto-allocates the payer's credit
    ///
    /// The receipt number is drawn before the payer's session opens, so the
    /// generator never competes with an open session for a store connection.
    /// Completion itself re-checks the status under the payer's lock; if a
    /// concurrent call won, the drawn number is left unused.
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` if the payment does not exist
    /// - `BillingError::Validation` if it is not pending
    #[instrument(skip(self, meta), fields(payment_id = %payment_id))]
    pub async fn complete_payment(
        &self,
        payment_id: PaymentId,
        meta: &OperationMetadata,
    ) -> Result<PaymentCompletion, BillingError> {
        let payer_id = self.owner(EntityRef::Payment(payment_id)).await?;
        let year = self.pending_payment_year(payer_id, payment_id).await?;
        let receipt = self
            .numbers
            .generate(&self.config.receipt_prefix, year)
            .await?;

        let (payment, allocation) = self
            .in_session(payer_id, |book| book.complete_payment(payment_id, receipt))
            .await?;

        self.audit(
            AuditEntry::new("payment.completed", "Payment", payment_id).with_new_values(to_json(&payment)),
            meta,
        )
        .await;
        self.audit_allocations(&allocation, meta).await;

        Ok(PaymentCompletion { payment, allocation })
    }

    /// Cancels a pending payment
    #[instrument(skip(self, reason, meta), fields(payment_id = %payment_id))]
    pub async fn cancel_payment(
        &self,
        payment_id: PaymentId,
        reason: &str,
        meta: &OperationMetadata,
    ) -> Result<Payment, BillingError> {
        let payer_id = self.owner(EntityRef::Payment(payment_id)).await?;
        let payment = self
            .in_session(payer_id, |book| book.cancel_payment(payment_id, reason))
            .await?;

        self.audit(
            AuditEntry::new("payment.cancelled", "Payment", payment_id).with_new_values(to_json(&payment)),
            meta,
        )
        .await;
        Ok(payment)
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocates credit by hand to an invoice, or one of its lines
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the invoice belongs to another
    /// payer, plus everything [`PayerBook::allocate_manual`] rejects.
    #[instrument(skip(self, meta), fields(payer_id = %payer_id, invoice_id = %invoice_id))]
    pub async fn allocate_manual(
        &self,
        payer_id: PayerId,
        invoice_id: InvoiceId,
        line_id: Option<InvoiceLineId>,
        amount: Decimal,
        meta: &OperationMetadata,
    ) -> Result<AllocationOutcome, BillingError> {
        let owner = self.owner(EntityRef::Invoice(invoice_id)).await?;
        if owner != payer_id {
            return Err(BillingError::validation(format!(
                "Invoice {} does not belong to payer {}",
                invoice_id, payer_id
            )));
        }

        let outcome = self
            .in_session(payer_id, |book| book.allocate_manual(invoice_id, line_id, amount))
            .await?;

        self.audit_allocations(&outcome, meta).await;
        Ok(outcome)
    }

    /// Spreads a payer's available credit over their open invoices
    #[instrument(skip(self, meta), fields(payer_id = %payer_id))]
    pub async fn allocate_auto(
        &self,
        payer_id: PayerId,
        max_amount: Option<Decimal>,
        meta: &OperationMetadata,
    ) -> Result<AllocationOutcome, BillingError> {
        let outcome = self
            .in_session(payer_id, |book| book.allocate_auto(max_amount))
            .await?;

        self.audit_allocations(&outcome, meta).await;
        Ok(outcome)
    }

    /// Reverses an allocation; the credit becomes available again
    #[instrument(skip(self, reason, meta), fields(allocation_id = %allocation_id))]
    pub async fn delete_allocation(
        &self,
        allocation_id: CreditAllocationId,
        reason: &str,
        meta: &OperationMetadata,
    ) -> Result<CreditAllocation, BillingError> {
        let payer_id = self.owner(EntityRef::Allocation(allocation_id)).await?;
        let allocation = self
            .in_session(payer_id, |book| book.delete_allocation(allocation_id))
            .await?;

        info!(allocation_id = %allocation_id, reason, "Allocation reversed");
        self.audit(
            AuditEntry::new("credit_allocation.deleted", "CreditAllocation", allocation_id)
                .with_old_values(to_json(&allocation))
                .with_new_values(serde_json::json!({ "reason": reason })),
            meta,
        )
        .await;
        Ok(allocation)
    }

    // ========================================================================
    // Balance
    // ========================================================================

    /// Repairs a payer's cached credit from the source rows
    #[instrument(skip(self, meta), fields(payer_id = %payer_id))]
    pub async fn reconcile(
        &self,
        payer_id: PayerId,
        meta: &OperationMetadata,
    ) -> Result<Reconciliation, BillingError> {
        let result = self
            .in_session(payer_id, |book| Ok(book.reconcile()))
            .await?;

        if result.has_drift() {
            self.audit(
                AuditEntry::new("payer.reconciled", "Payer", payer_id)
                    .with_old_values(serde_json::json!({ "available_credit": result.cached }))
                    .with_new_values(serde_json::json!({ "available_credit": result.recomputed })),
                meta,
            )
            .await;
        }
        Ok(result)
    }

    /// Summarises a payer's account as of today
    pub async fn statement(&self, payer_id: PayerId) -> Result<PayerStatement, BillingError> {
        let book = self.book(payer_id).await?;
        Ok(book.statement(today()))
    }

    /// Returns a read-only copy of a payer's book
    pub async fn book(&self, payer_id: PayerId) -> Result<PayerBook, BillingError> {
        let session = self.store.begin(payer_id).await?;
        let book = session.book().clone();
        discard(session).await;
        Ok(book)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn owner(&self, entity: EntityRef) -> Result<PayerId, BillingError> {
        Ok(self.store.resolve_payer(entity).await?)
    }

    /// Year of a payment's date, failing unless it is still pending
    async fn pending_payment_year(&self, payer_id: PayerId, payment_id: PaymentId) -> Result<i32, BillingError> {
        let book = self.book(payer_id).await?;
        let payment = book.payment(payment_id)?;
        if payment.status != PaymentStatus::Pending {
            return Err(BillingError::validation(format!(
                "Payment {} is {} and cannot be completed",
                payment_id,
                payment.status.as_str()
            )));
        }
        Ok(payment.payment_date.year())
    }

    /// Runs `op` on the payer's book inside one session
    ///
    /// Commits on success; rolls back on any error.
    async fn in_session<T, F>(&self, payer_id: PayerId, op: F) -> Result<T, BillingError>
    where
        F: FnOnce(&mut PayerBook) -> Result<T, BillingError>,
    {
        let mut session = self.store.begin(payer_id).await?;
        match op(session.book_mut()) {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(error) => {
                discard(session).await;
                Err(error)
            }
        }
    }

    async fn audit_allocations(&self, outcome: &AllocationOutcome, meta: &OperationMetadata) {
        for allocation in &outcome.allocations {
            self.audit(
                AuditEntry::new("credit_allocation.created", "CreditAllocation", allocation.id)
                    .with_new_values(to_json(allocation)),
                meta,
            )
            .await;
        }
    }

    async fn audit(&self, entry: AuditEntry, meta: &OperationMetadata) {
        let action = entry.action.clone();
        if let Err(error) = self.audit.log(entry.with_metadata(meta)).await {
            warn!(action = %action, error = %error, "Audit log failed; change remains committed");
        }
    }
}

async fn discard<T: LedgerSession>(session: T) {
    if let Err(error) = session.rollback().await {
        warn!(error = %error, "Rollback failed");
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
