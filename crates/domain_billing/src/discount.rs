//! Discount engine
//!
//! Discounts are immutable application records owned by one line. Applying a
//! discount raises the line's `discount_amount`; removing it lowers the amount
//! by exactly what was applied. Standing [`StudentDiscount`] rules are applied
//! automatically when a line is added.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use core_kernel::{
    percentage_of, round2, DiscountId, InvoiceId, InvoiceLineId, PayerId, StudentDiscountId,
};

use crate::book::PayerBook;
use crate::error::BillingError;
use crate::invoice::{recompute_line_and_invoice, InvoiceStatus};
use crate::line::{BillingKind, InvoiceLine};

/// How a discount value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountValueType {
    /// A fixed amount, capped at the line's remaining discount headroom
    Fixed,
    /// A percentage of the line total, at most 100
    Percentage,
}

impl DiscountValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountValueType::Fixed => "fixed",
            DiscountValueType::Percentage => "percentage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fixed" => Some(DiscountValueType::Fixed),
            "percentage" => Some(DiscountValueType::Percentage),
            _ => None,
        }
    }
}

/// A discount applied to one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub invoice_id: InvoiceId,
    pub line_id: InvoiceLineId,
    pub value_type: DiscountValueType,
    pub value: Decimal,
    /// Amount actually taken off the line
    pub calculated_amount: Decimal,
    pub reason: Option<String>,
    /// Standing rule this discount came from, if any
    pub student_discount_id: Option<StudentDiscountId>,
    pub created_at: DateTime<Utc>,
}

/// A payer-level discount rule applied to every new matching line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentDiscount {
    pub id: StudentDiscountId,
    pub payer_id: PayerId,
    /// `None` matches every billing kind
    pub billing_kind: Option<BillingKind>,
    pub value_type: DiscountValueType,
    pub value: Decimal,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentDiscount {
    /// Creates an active rule covering every billing kind
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for a non-positive value, a value
    /// finer than cents, or a percentage above 100.
    pub fn new(
        payer_id: PayerId,
        value_type: DiscountValueType,
        value: Decimal,
    ) -> Result<Self, BillingError> {
        validate_value(value_type, value)?;
        let now = Utc::now();

        Ok(Self {
            id: StudentDiscountId::new(),
            payer_id,
            billing_kind: None,
            value_type,
            value,
            reason: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Restricts the rule to one billing kind
    pub fn for_kind(mut self, kind: BillingKind) -> Self {
        self.billing_kind = Some(kind);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True if the rule is active and covers `kind`
    pub fn matches(&self, kind: BillingKind) -> bool {
        self.is_active && self.billing_kind.map_or(true, |k| k == kind)
    }
}

fn validate_value(value_type: DiscountValueType, value: Decimal) -> Result<(), BillingError> {
    if value <= Decimal::ZERO {
        return Err(BillingError::validation(format!(
            "Discount value must be positive, got {}",
            value
        )));
    }
    // Stored as NUMERIC(14, 2); finer values would change on reload
    if value.round_dp(2) != value {
        return Err(BillingError::validation(format!(
            "Discount value cannot have more than two decimal places, got {}",
            value
        )));
    }
    if value_type == DiscountValueType::Percentage && value > Decimal::ONE_HUNDRED {
        return Err(BillingError::validation(format!(
            "Percentage discount cannot exceed 100, got {}",
            value
        )));
    }
    Ok(())
}

/// Computes the amount a discount would take off `line`
///
/// Fixed values are capped at the line's discount headroom; percentages are
/// taken of the full line total.
///
/// # Errors
///
/// Returns `BillingError::Validation` for a non-positive value, a value with
/// more than two decimal places, a percentage above 100, or a result that would push the cumulative discount past the
/// line total or the net amount below what is already paid.
pub fn calculate_discount(
    line: &InvoiceLine,
    value_type: DiscountValueType,
    value: Decimal,
) -> Result<Decimal, BillingError> {
    validate_value(value_type, value)?;

    let amount = match value_type {
        DiscountValueType::Fixed => round2(value).min(line.discount_headroom()),
        DiscountValueType::Percentage => percentage_of(line.line_total, value),
    };

    if line.discount_amount + amount > line.line_total {
        return Err(BillingError::validation(format!(
            "Discount of {} would exceed line total {} (already discounted {})",
            amount, line.line_total, line.discount_amount
        )));
    }
    if line.net_amount - amount < line.paid_amount {
        return Err(BillingError::validation(format!(
            "Discount of {} would drop the net amount below the {} already paid",
            amount, line.paid_amount
        )));
    }

    Ok(amount)
}

impl PayerBook {
    /// Applies a discount to a line
    ///
    /// # Arguments
    ///
    /// * `line_id` - The line to discount
    /// * `value_type` - Fixed amount or percentage
    /// * `value` - The discount value
    /// * `reason` - Optional free text
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` if the line is not in this book
    /// - `BillingError::Validation` if the invoice is not draft, issued or
    ///   partially paid, or the discount is rejected by [`calculate_discount`]
    pub fn apply_discount(
        &mut self,
        line_id: InvoiceLineId,
        value_type: DiscountValueType,
        value: Decimal,
        reason: Option<String>,
    ) -> Result<Discount, BillingError> {
        self.atomically(|book| book.apply_discount_in(line_id, value_type, value, reason, None))
    }

    /// Removes a discount, restoring the line's amounts
    pub fn remove_discount(&mut self, discount_id: DiscountId) -> Result<Discount, BillingError> {
        self.atomically(|book| {
            let discount = book.discount(discount_id)?.clone();
            let (invoice_index, line_index) = book.line_position(discount.line_id)?;
            let invoice = &mut book.invoices[invoice_index];
            ensure_discountable(invoice.status, &invoice.invoice_number)?;

            invoice.lines[line_index].discount_amount -= discount.calculated_amount;
            recompute_line_and_invoice(invoice, line_index)?;

            book.discounts.retain(|d| d.id != discount_id);
            book.changes.mark_discount_deleted(discount_id);
            book.changes.mark_invoice(discount.invoice_id);

            debug!(
                discount_id = %discount_id,
                line_id = %discount.line_id,
                amount = %discount.calculated_amount,
                "Discount removed"
            );
            Ok(discount)
        })
    }

    /// Applies every active standing discount matching `billing_kind` to a line
    ///
    /// Rules are applied once each, in creation order.
    pub fn apply_standing_discounts(
        &mut self,
        line_id: InvoiceLineId,
        billing_kind: BillingKind,
    ) -> Result<Vec<Discount>, BillingError> {
        self.atomically(|book| book.apply_standing_discounts_in(line_id, billing_kind))
    }

    /// Registers a standing discount for this payer
    pub fn add_student_discount(
        &mut self,
        billing_kind: Option<BillingKind>,
        value_type: DiscountValueType,
        value: Decimal,
        reason: Option<String>,
    ) -> Result<StudentDiscount, BillingError> {
        let mut rule = StudentDiscount::new(self.payer_id, value_type, value)?;
        rule.billing_kind = billing_kind;
        rule.reason = reason;

        self.changes.mark_student_discount(rule.id);
        self.student_discounts.push(rule.clone());
        Ok(rule)
    }

    /// Stops a standing discount from applying to new lines
    ///
    /// Discounts it already produced are left in place.
    pub fn deactivate_student_discount(
        &mut self,
        id: StudentDiscountId,
    ) -> Result<StudentDiscount, BillingError> {
        let rule = self
            .student_discounts
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| BillingError::not_found("StudentDiscount", id))?;

        rule.is_active = false;
        rule.updated_at = Utc::now();
        let rule = rule.clone();
        self.changes.mark_student_discount(id);
        Ok(rule)
    }

    pub(crate) fn apply_standing_discounts_in(
        &mut self,
        line_id: InvoiceLineId,
        billing_kind: BillingKind,
    ) -> Result<Vec<Discount>, BillingError> {
        let mut rules: Vec<StudentDiscount> = self
            .student_discounts
            .iter()
            .filter(|rule| rule.payer_id == self.payer_id && rule.matches(billing_kind))
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.created_at);

        rules
            .into_iter()
            .map(|rule| {
                self.apply_discount_in(
                    line_id,
                    rule.value_type,
                    rule.value,
                    rule.reason.clone(),
                    Some(rule.id),
                )
            })
            .collect()
    }

    fn apply_discount_in(
        &mut self,
        line_id: InvoiceLineId,
        value_type: DiscountValueType,
        value: Decimal,
        reason: Option<String>,
        student_discount_id: Option<StudentDiscountId>,
    ) -> Result<Discount, BillingError> {
        let (invoice_index, line_index) = self.line_position(line_id)?;
        let invoice = &mut self.invoices[invoice_index];
        ensure_discountable(invoice.status, &invoice.invoice_number)?;

        let amount = calculate_discount(&invoice.lines[line_index], value_type, value)?;
        invoice.lines[line_index].discount_amount += amount;
        recompute_line_and_invoice(invoice, line_index)?;

        let discount = Discount {
            id: DiscountId::new(),
            invoice_id: invoice.id,
            line_id,
            value_type,
            value,
            calculated_amount: amount,
            reason,
            student_discount_id,
            created_at: Utc::now(),
        };

        debug!(
            discount_id = %discount.id,
            line_id = %line_id,
            amount = %amount,
            standing = student_discount_id.is_some(),
            "Discount applied"
        );

        self.changes.mark_discount(discount.id);
        self.changes.mark_invoice(discount.invoice_id);
        self.discounts.push(discount.clone());
        Ok(discount)
    }
}

fn ensure_discountable(status: InvoiceStatus, invoice_number: &str) -> Result<(), BillingError> {
    if !status.allows_discounts() {
        return Err(BillingError::validation(format!(
            "Invoice {} is {}; discounts cannot be changed",
            invoice_number,
            status.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceType;
    use crate::line::{CatalogItemRef, NewInvoiceLine};
    use chrono::NaiveDate;
    use core_kernel::CatalogItemId;
    use rust_decimal_macros::dec;

    fn book_with_line(price: Decimal) -> (PayerBook, InvoiceId, InvoiceLineId) {
        let mut book = PayerBook::new(PayerId::new());
        let invoice = book.create_invoice(InvoiceType::Term, "INV-T-1", None, None);
        let line = book
            .add_line(
                invoice.id,
                NewInvoiceLine::new(
                    CatalogItemRef::product(CatalogItemId::new()),
                    "Tuition",
                    BillingKind::Tuition,
                    price,
                ),
            )
            .unwrap();
        (book, invoice.id, line.id)
    }

    #[test]
    fn test_percentage_discount_and_removal() {
        let (mut book, invoice_id, line_id) = book_with_line(dec!(1000));

        let discount = book
            .apply_discount(line_id, DiscountValueType::Percentage, dec!(15), None)
            .unwrap();
        assert_eq!(discount.calculated_amount, dec!(150));
        assert_eq!(book.line(line_id).unwrap().net_amount, dec!(850));
        assert_eq!(book.invoice(invoice_id).unwrap().discount_total, dec!(150));

        book.remove_discount(discount.id).unwrap();
        let line = book.line(line_id).unwrap();
        assert_eq!(line.discount_amount, Decimal::ZERO);
        assert_eq!(line.net_amount, dec!(1000));
        assert!(book.discounts().is_empty());
        assert!(book.changes().deleted_discounts.contains(&discount.id));
    }

    #[test]
    fn test_fixed_discount_is_capped_at_headroom() {
        let (mut book, _, line_id) = book_with_line(dec!(100));
        book.apply_discount(line_id, DiscountValueType::Fixed, dec!(80), None).unwrap();

        let second = book
            .apply_discount(line_id, DiscountValueType::Fixed, dec!(50), None)
            .unwrap();
        assert_eq!(second.calculated_amount, dec!(20));
        assert_eq!(book.line(line_id).unwrap().net_amount, Decimal::ZERO);
    }

    #[test]
    fn test_percentage_over_hundred_rejected() {
        let (mut book, _, line_id) = book_with_line(dec!(100));
        let result = book.apply_discount(line_id, DiscountValueType::Percentage, dec!(101), None);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_cumulative_percentage_cannot_exceed_line_total() {
        let (mut book, _, line_id) = book_with_line(dec!(100));
        book.apply_discount(line_id, DiscountValueType::Percentage, dec!(60), None).unwrap();

        let before = book.clone();
        let result = book.apply_discount(line_id, DiscountValueType::Percentage, dec!(50), None);
        assert!(result.unwrap_err().is_validation());
        assert_eq!(book, before);
    }

    #[test]
    fn test_non_positive_value_rejected() {
        let (mut book, _, line_id) = book_with_line(dec!(100));
        let result = book.apply_discount(line_id, DiscountValueType::Fixed, Decimal::ZERO, None);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_value_finer_than_cents_rejected() {
        let (mut book, _, line_id) = book_with_line(dec!(1000));
        let result = book.apply_discount(line_id, DiscountValueType::Percentage, dec!(12.345), None);
        assert!(result.unwrap_err().is_validation());
        assert_eq!(book.line(line_id).unwrap().discount_amount, Decimal::ZERO);

        let rule = book.add_student_discount(None, DiscountValueType::Fixed, dec!(0.005), None);
        assert!(rule.unwrap_err().is_validation());

        let kept = book
            .apply_discount(line_id, DiscountValueType::Percentage, dec!(12.35), None)
            .unwrap();
        assert_eq!(kept.calculated_amount, dec!(123.50));
    }

    #[test]
    fn test_discount_rejected_on_cancelled_invoice() {
        let (mut book, invoice_id, line_id) = book_with_line(dec!(100));
        book.cancel_invoice(invoice_id).unwrap();
        assert_eq!(book.invoice(invoice_id).unwrap().status, InvoiceStatus::Cancelled);

        let result = book.apply_discount(line_id, DiscountValueType::Fixed, dec!(5), None);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_discount_on_issued_invoice_can_settle_it() {
        let (mut book, invoice_id, line_id) = book_with_line(dec!(100));
        let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        book.issue_invoice(invoice_id, today, None, 30).unwrap();

        book.apply_discount(line_id, DiscountValueType::Percentage, dec!(100), None).unwrap();
        assert_eq!(book.invoice(invoice_id).unwrap().status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_standing_discounts_apply_on_new_lines() {
        let mut book = PayerBook::new(PayerId::new());
        book.add_student_discount(Some(BillingKind::Tuition), DiscountValueType::Percentage, dec!(10), Some("Sibling".into()))
            .unwrap();
        book.add_student_discount(None, DiscountValueType::Fixed, dec!(5), None).unwrap();
        book.add_student_discount(Some(BillingKind::Transport), DiscountValueType::Fixed, dec!(50), None)
            .unwrap();

        let invoice = book.create_invoice(InvoiceType::Term, "INV-T-2", None, None);
        let line = book
            .add_line(
                invoice.id,
                NewInvoiceLine::new(
                    CatalogItemRef::product(CatalogItemId::new()),
                    "Tuition",
                    BillingKind::Tuition,
                    dec!(200),
                ),
            )
            .unwrap();

        assert_eq!(line.discount_amount, dec!(25));
        assert_eq!(book.discounts().len(), 2);
        assert!(book.discounts().iter().all(|d| d.student_discount_id.is_some()));
        assert_eq!(book.discounts()[0].calculated_amount, dec!(20));
    }

    #[test]
    fn test_deactivated_rule_no_longer_applies() {
        let mut book = PayerBook::new(PayerId::new());
        let rule = book
            .add_student_discount(None, DiscountValueType::Fixed, dec!(5), None)
            .unwrap();
        book.deactivate_student_discount(rule.id).unwrap();

        let invoice = book.create_invoice(InvoiceType::Term, "INV-T-3", None, None);
        let line = book
            .add_line(
                invoice.id,
                NewInvoiceLine::new(
                    CatalogItemRef::product(CatalogItemId::new()),
                    "Meals",
                    BillingKind::Meals,
                    dec!(40),
                ),
            )
            .unwrap();
        assert_eq!(line.discount_amount, Decimal::ZERO);
    }

    #[test]
    fn test_removing_line_drops_its_discounts() {
        let (mut book, _, line_id) = book_with_line(dec!(100));
        let discount = book
            .apply_discount(line_id, DiscountValueType::Fixed, dec!(10), None)
            .unwrap();

        book.remove_line(line_id).unwrap();
        assert!(book.discounts().is_empty());
        assert!(book.changes().deleted_discounts.contains(&discount.id));
        assert!(book.changes().deleted_lines.contains(&line_id));
    }
}
