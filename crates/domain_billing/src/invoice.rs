//! Invoice ledger
//!
//! An invoice owns its lines and carries five derived totals that are always
//! the sums of those lines. Status moves `draft -> issued -> partially_paid ->
//! paid` as allocations land, or ends in `cancelled` / `void`.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use core_kernel::{BillingPeriodId, InvoiceId, InvoiceLineId, PayerId};

use crate::book::PayerBook;
use crate::error::BillingError;
use crate::line::{recompute_line, InvoiceLine, NewInvoiceLine};

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Being drafted; lines may change
    Draft,
    /// Issued with nothing paid yet
    Issued,
    /// Some but not all of the total has been allocated
    PartiallyPaid,
    /// Fully paid
    Paid,
    /// Cancelled before any payment
    Cancelled,
    /// Voided after payments were reversed elsewhere
    Void,
}

impl InvoiceStatus {
    /// Open invoices can receive credit
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
    }

    /// Discounts may only be applied or removed in these statuses
    pub fn allows_discounts(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Draft | InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Void)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(InvoiceStatus::Draft),
            "issued" => Some(InvoiceStatus::Issued),
            "partially_paid" => Some(InvoiceStatus::PartiallyPaid),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            "void" => Some(InvoiceStatus::Void),
            _ => None,
        }
    }
}

/// What an invoice was raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    /// Regular termly billing run
    Term,
    /// Admission of a new student
    Admission,
    /// Extra charges during a term
    Supplementary,
    /// Raised by hand
    Manual,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Term => "term",
            InvoiceType::Admission => "admission",
            InvoiceType::Supplementary => "supplementary",
            InvoiceType::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "term" => Some(InvoiceType::Term),
            "admission" => Some(InvoiceType::Admission),
            "supplementary" => Some(InvoiceType::Supplementary),
            "manual" => Some(InvoiceType::Manual),
            _ => None,
        }
    }
}

/// An invoice for one payer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Document number from the number generator
    pub invoice_number: String,
    /// Who is billed
    pub payer_id: PayerId,
    /// Billing period, for termly invoices
    pub billing_period_id: Option<BillingPeriodId>,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    /// Set when issued
    pub issue_date: Option<NaiveDate>,
    /// Set when issued
    pub due_date: Option<NaiveDate>,
    /// Sum of line totals
    pub subtotal: Decimal,
    /// Sum of line discounts
    pub discount_total: Decimal,
    /// `subtotal - discount_total`
    pub total: Decimal,
    /// Sum of line payments
    pub paid_total: Decimal,
    /// `total - paid_total`
    pub amount_due: Decimal,
    pub notes: Option<String>,
    /// Lines in creation order
    pub lines: Vec<InvoiceLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates an empty draft invoice
    ///
    /// # Arguments
    ///
    /// * `payer_id` - Who is billed
    /// * `invoice_type` - What the invoice is for
    /// * `invoice_number` - Document number issued by the number generator
    pub fn new(payer_id: PayerId, invoice_type: InvoiceType, invoice_number: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: InvoiceId::new(),
            invoice_number: invoice_number.into(),
            payer_id,
            billing_period_id: None,
            invoice_type,
            status: InvoiceStatus::Draft,
            issue_date: None,
            due_date: None,
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            total: Decimal::ZERO,
            paid_total: Decimal::ZERO,
            amount_due: Decimal::ZERO,
            notes: None,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the billing period
    pub fn with_billing_period(mut self, period: BillingPeriodId) -> Self {
        self.billing_period_id = Some(period);
        self
    }

    /// Sets free-text notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Finds a line by id
    pub fn line(&self, line_id: InvoiceLineId) -> Option<&InvoiceLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    /// Returns true if any line must be paid in full
    pub fn has_must_pay_in_full_line(&self) -> bool {
        self.lines.iter().any(|l| l.must_pay_in_full)
    }

    /// True for open invoices whose due date has passed
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status.is_open() && self.due_date.map_or(false, |due| today > due)
    }

    /// Appends a line to a draft invoice and recomputes the totals
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the invoice is not a draft or the
    /// line input is invalid.
    pub fn add_line(&mut self, new: NewInvoiceLine) -> Result<InvoiceLineId, BillingError> {
        self.ensure_draft("add a line to")?;
        let line = InvoiceLine::from_new(self.id, new)?;
        let line_id = line.id;
        self.lines.push(line);
        recompute_invoice(self);
        Ok(line_id)
    }

    /// Removes a line from a draft invoice and recomputes the totals
    pub fn remove_line(&mut self, line_id: InvoiceLineId) -> Result<InvoiceLine, BillingError> {
        self.ensure_draft("remove a line from")?;
        let position = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| BillingError::not_found("InvoiceLine", line_id))?;
        let line = self.lines.remove(position);
        recompute_invoice(self);
        Ok(line)
    }

    /// Issues a draft invoice
    ///
    /// The line set is frozen from here on. A fully discounted invoice goes
    /// straight to `paid`.
    ///
    /// # Arguments
    ///
    /// * `today` - Issue date
    /// * `due_date` - Explicit due date, or `None` for `today + default_due_days`
    /// * `default_due_days` - Payment term applied when no due date is given
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the invoice is not a draft or has
    /// no lines.
    pub fn issue(
        &mut self,
        today: NaiveDate,
        due_date: Option<NaiveDate>,
        default_due_days: u32,
    ) -> Result<(), BillingError> {
        self.ensure_draft("issue")?;
        if self.lines.is_empty() {
            return Err(BillingError::validation(format!(
                "Invoice {} has no lines and cannot be issued",
                self.invoice_number
            )));
        }

        let due_date = match due_date {
            Some(date) => date,
            None => today
                .checked_add_days(Days::new(u64::from(default_due_days)))
                .ok_or_else(|| BillingError::validation("Due date is out of range"))?,
        };

        self.status = InvoiceStatus::Issued;
        self.issue_date = Some(today);
        self.due_date = Some(due_date);
        recompute_invoice(self);
        Ok(())
    }

    /// Cancels an invoice that has received no payment
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` unless the invoice is a draft or
    /// issued and `paid_total` is zero.
    pub fn cancel(&mut self) -> Result<(), BillingError> {
        if !self.paid_total.is_zero() {
            return Err(BillingError::validation(format!(
                "Invoice {} has {} paid and cannot be cancelled",
                self.invoice_number, self.paid_total
            )));
        }
        if !matches!(self.status, InvoiceStatus::Draft | InvoiceStatus::Issued) {
            return Err(BillingError::validation(format!(
                "Invoice {} is {} and cannot be cancelled",
                self.invoice_number,
                self.status.as_str()
            )));
        }

        self.status = InvoiceStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_draft(&self, action: &str) -> Result<(), BillingError> {
        if self.status != InvoiceStatus::Draft {
            return Err(BillingError::validation(format!(
                "Cannot {} invoice {} in status {}",
                action,
                self.invoice_number,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// Derives the status implied by the totals
///
/// Draft, cancelled and void are left untouched.
pub fn derive_status(paid_total: Decimal, amount_due: Decimal, current: InvoiceStatus) -> InvoiceStatus {
    match current {
        InvoiceStatus::Draft | InvoiceStatus::Cancelled | InvoiceStatus::Void => current,
        _ if amount_due.is_zero() => InvoiceStatus::Paid,
        _ if paid_total > Decimal::ZERO => InvoiceStatus::PartiallyPaid,
        _ => InvoiceStatus::Issued,
    }
}

/// Re-sums the five totals from the lines and re-derives the status
pub fn recompute_invoice(invoice: &mut Invoice) {
    let (subtotal, discount_total, paid_total) = invoice.lines.iter().fold(
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        |(subtotal, discount, paid), line| {
            (
                subtotal + line.line_total,
                discount + line.discount_amount,
                paid + line.paid_amount,
            )
        },
    );

    invoice.subtotal = subtotal;
    invoice.discount_total = discount_total;
    invoice.total = subtotal - discount_total;
    invoice.paid_total = paid_total;
    invoice.amount_due = invoice.total - paid_total;
    invoice.status = derive_status(invoice.paid_total, invoice.amount_due, invoice.status);
    invoice.updated_at = Utc::now();
}

/// Recomputes one line, then its invoice
pub(crate) fn recompute_line_and_invoice(
    invoice: &mut Invoice,
    line_index: usize,
) -> Result<(), BillingError> {
    let line = invoice
        .lines
        .get_mut(line_index)
        .ok_or_else(|| BillingError::invalid_state("Line position out of range"))?;
    recompute_line(line)?;
    recompute_invoice(invoice);
    Ok(())
}

impl PayerBook {
    /// Creates a draft invoice for this payer
    pub fn create_invoice(
        &mut self,
        invoice_type: InvoiceType,
        invoice_number: impl Into<String>,
        billing_period_id: Option<BillingPeriodId>,
        notes: Option<String>,
    ) -> Invoice {
        let mut invoice = Invoice::new(self.payer_id, invoice_type, invoice_number);
        invoice.billing_period_id = billing_period_id;
        invoice.notes = notes;

        debug!(invoice_id = %invoice.id, number = %invoice.invoice_number, "Draft invoice created");
        self.changes.mark_invoice(invoice.id);
        self.invoices.push(invoice.clone());
        invoice
    }

    /// Adds a line to a draft invoice and applies the payer's standing discounts
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` if the invoice is not in this book
    /// - `BillingError::Validation` if the invoice is not a draft, the line
    ///   input is invalid, or a standing discount cannot be applied
    pub fn add_line(
        &mut self,
        invoice_id: InvoiceId,
        new: NewInvoiceLine,
    ) -> Result<InvoiceLine, BillingError> {
        self.atomically(|book| {
            let billing_kind = new.billing_kind;
            let index = book.invoice_index(invoice_id)?;
            let line_id = book.invoices[index].add_line(new)?;
            book.changes.mark_invoice(invoice_id);

            book.apply_standing_discounts_in(line_id, billing_kind)?;

            let (invoice_index, line_index) = book.line_position(line_id)?;
            Ok(book.invoices[invoice_index].lines[line_index].clone())
        })
    }

    /// Removes a line, and the discounts it owns, from a draft invoice
    pub fn remove_line(&mut self, line_id: InvoiceLineId) -> Result<InvoiceLine, BillingError> {
        self.atomically(|book| {
            let (index, _) = book.line_position(line_id)?;
            let line = book.invoices[index].remove_line(line_id)?;
            let invoice_id = book.invoices[index].id;

            let owned: Vec<_> = book
                .discounts
                .iter()
                .filter(|d| d.line_id == line_id)
                .map(|d| d.id)
                .collect();
            book.discounts.retain(|d| d.line_id != line_id);
            for discount_id in owned {
                book.changes.mark_discount_deleted(discount_id);
            }

            book.changes.mark_line_deleted(line_id);
            book.changes.mark_invoice(invoice_id);
            Ok(line)
        })
    }

    /// Issues a draft invoice
    pub fn issue_invoice(
        &mut self,
        invoice_id: InvoiceId,
        today: NaiveDate,
        due_date: Option<NaiveDate>,
        default_due_days: u32,
    ) -> Result<Invoice, BillingError> {
        self.atomically(|book| {
            let index = book.invoice_index(invoice_id)?;
            let invoice = &mut book.invoices[index];
            invoice.issue(today, due_date, default_due_days)?;

            info!(
                invoice_id = %invoice.id,
                number = %invoice.invoice_number,
                total = %invoice.total,
                status = invoice.status.as_str(),
                "Invoice issued"
            );
            let issued = invoice.clone();
            book.changes.mark_invoice(invoice_id);
            Ok(issued)
        })
    }

    /// Cancels an unpaid draft or issued invoice
    pub fn cancel_invoice(&mut self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        self.atomically(|book| {
            let index = book.invoice_index(invoice_id)?;
            book.invoices[index].cancel()?;
            book.changes.mark_invoice(invoice_id);
            Ok(book.invoices[index].clone())
        })
    }
}
