//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for ledger types that give more
//! meaningful error messages than standard assertions.

use rust_decimal::Decimal;

use domain_billing::{Invoice, InvoiceLine, PayerBook};

/// Asserts the line's derived fields and bounds
///
/// # Panics
///
/// Panics unless `net = total - discount`, `remaining = net - paid`, and
/// `0 <= paid <= net <= total`.
pub fn assert_line_consistent(line: &InvoiceLine) {
    assert_eq!(
        line.net_amount,
        line.line_total - line.discount_amount,
        "Line {}: net_amount {} != line_total {} - discount_amount {}",
        line.id,
        line.net_amount,
        line.line_total,
        line.discount_amount
    );
    assert_eq!(
        line.remaining_amount,
        line.net_amount - line.paid_amount,
        "Line {}: remaining_amount {} != net_amount {} - paid_amount {}",
        line.id,
        line.remaining_amount,
        line.net_amount,
        line.paid_amount
    );
    assert!(
        line.paid_amount >= Decimal::ZERO && line.paid_amount <= line.net_amount,
        "Line {}: paid_amount {} outside 0..={}",
        line.id,
        line.paid_amount,
        line.net_amount
    );
    assert!(
        line.net_amount <= line.line_total,
        "Line {}: net_amount {} exceeds line_total {}",
        line.id,
        line.net_amount,
        line.line_total
    );
}

/// Asserts the invoice's five totals are the sums of its lines
pub fn assert_invoice_consistent(invoice: &Invoice) {
    let sum = |f: fn(&InvoiceLine) -> Decimal| invoice.lines.iter().map(f).sum::<Decimal>();

    assert_eq!(invoice.subtotal, sum(|l| l.line_total), "Invoice {}: subtotal", invoice.invoice_number);
    assert_eq!(
        invoice.discount_total,
        sum(|l| l.discount_amount),
        "Invoice {}: discount_total",
        invoice.invoice_number
    );
    assert_eq!(invoice.paid_total, sum(|l| l.paid_amount), "Invoice {}: paid_total", invoice.invoice_number);
    assert_eq!(
        invoice.total,
        invoice.subtotal - invoice.discount_total,
        "Invoice {}: total",
        invoice.invoice_number
    );
    assert_eq!(
        invoice.amount_due,
        invoice.total - invoice.paid_total,
        "Invoice {}: amount_due",
        invoice.invoice_number
    );

    for line in &invoice.lines {
        assert_line_consistent(line);
    }
}

/// Asserts every invariant a payer book must hold at rest
///
/// Checks each invoice and line, that allocations never exceed completed
/// payments, and that the cached credit matches the recomputed value.
pub fn assert_book_consistent(book: &PayerBook) {
    for invoice in book.invoices() {
        assert_invoice_consistent(invoice);
    }

    let received: Decimal = book
        .payments()
        .iter()
        .filter(|p| p.is_completed())
        .map(|p| p.amount)
        .sum();
    let allocated: Decimal = book.allocations().iter().map(|a| a.amount).sum();
    assert!(
        allocated <= received,
        "Payer {}: allocated {} exceeds received {}",
        book.payer_id(),
        allocated,
        received
    );
    assert_credit_reconciled(book);
}

/// Asserts the cached credit equals completed payments minus allocations
pub fn assert_credit_reconciled(book: &PayerBook) {
    assert_eq!(
        book.available_credit(),
        book.recomputed_credit(),
        "Payer {}: cached credit {} drifted from recomputed {}",
        book.payer_id(),
        book.available_credit(),
        book.recomputed_credit()
    );
}

/// Asserts two snapshots of an invoice agree on every money field and status
///
/// Timestamps and line order are ignored.
pub fn assert_same_ledger_fields(actual: &Invoice, expected: &Invoice) {
    assert_eq!(actual.id, expected.id, "comparing different invoices");
    assert_eq!(actual.status, expected.status, "Invoice {}: status", expected.invoice_number);
    assert_eq!(
        (actual.subtotal, actual.discount_total, actual.total, actual.paid_total, actual.amount_due),
        (expected.subtotal, expected.discount_total, expected.total, expected.paid_total, expected.amount_due),
        "Invoice {}: totals",
        expected.invoice_number
    );
    assert_eq!(actual.lines.len(), expected.lines.len(), "Invoice {}: line count", expected.invoice_number);

    for e in &expected.lines {
        let a = actual
            .line(e.id)
            .unwrap_or_else(|| panic!("Invoice {}: line {} missing", expected.invoice_number, e.id));
        assert_eq!(
            (a.discount_amount, a.net_amount, a.paid_amount, a.remaining_amount),
            (e.discount_amount, e.net_amount, e.paid_amount, e.remaining_amount),
            "Line {}: amounts",
            e.id
        );
    }
}

/// Asserts `amounts` sum to exactly `total`
pub fn assert_sums_to(amounts: &[Decimal], total: Decimal) {
    let sum: Decimal = amounts.iter().copied().sum();
    assert_eq!(sum, total, "Amounts {:?} sum to {}, expected {}", amounts, sum, total);
}
