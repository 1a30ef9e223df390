//! Test Data Builders
//!
//! Provides builder patterns for constructing ledger test data with sensible
//! defaults. Tests specify only the fields they care about.
//!
//! Builders drive the real `PayerBook` operations rather than filling structs
//! by hand, so everything they produce satisfies the ledger's invariants.

use chrono::NaiveDate;
use fake::faker::lorem::en::Word;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{InvoiceId, PayerId};
use domain_billing::{
    BillingKind, CatalogItemRef, DiscountValueType, InvoiceType, NewInvoiceLine, PayerBook,
    PaymentMethod,
};

use crate::fixtures::{DateFixtures, IdFixtures, StringFixtures};

/// Builder for a single invoice line
pub struct LineBuilder {
    catalog_item: CatalogItemRef,
    description: Option<String>,
    billing_kind: BillingKind,
    quantity: Decimal,
    unit_price: Decimal,
    must_pay_in_full: bool,
}

impl Default for LineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuilder {
    /// Creates a tuition line of 100.00, payable in instalments
    pub fn new() -> Self {
        Self {
            catalog_item: IdFixtures::product(),
            description: None,
            billing_kind: BillingKind::Tuition,
            quantity: Decimal::ONE,
            unit_price: dec!(100.00),
            must_pay_in_full: false,
        }
    }

    pub fn price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn kind(mut self, kind: BillingKind) -> Self {
        self.billing_kind = kind;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Bills a kit instead of a single product
    pub fn kit(mut self) -> Self {
        self.catalog_item = IdFixtures::kit();
        self
    }

    /// Marks the line as payable only in full
    pub fn must_pay_in_full(mut self) -> Self {
        self.must_pay_in_full = true;
        self
    }

    /// Builds the line input; descriptions default to a random word
    pub fn build(self) -> NewInvoiceLine {
        let description = self.description.unwrap_or_else(|| Word().fake::<String>());
        NewInvoiceLine::new(self.catalog_item, description, self.billing_kind, self.unit_price)
            .with_quantity(self.quantity)
            .must_pay_in_full(self.must_pay_in_full)
    }
}

/// Builder for an invoice created inside a payer book
pub struct InvoiceBuilder {
    invoice_type: InvoiceType,
    lines: Vec<NewInvoiceLine>,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    issued: bool,
}

impl Default for InvoiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceBuilder {
    /// Creates an issued term invoice with no lines yet
    pub fn new() -> Self {
        Self {
            invoice_type: InvoiceType::Term,
            lines: Vec::new(),
            issue_date: DateFixtures::issue_date(),
            due_date: Some(DateFixtures::due_date()),
            issued: true,
        }
    }

    pub fn invoice_type(mut self, invoice_type: InvoiceType) -> Self {
        self.invoice_type = invoice_type;
        self
    }

    pub fn line(mut self, line: NewInvoiceLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Adds a line of `price` that may be paid in instalments
    pub fn partial_line(self, price: Decimal) -> Self {
        self.line(LineBuilder::new().price(price).build())
    }

    /// Adds a line of `price` that must be paid in full
    pub fn full_line(self, price: Decimal) -> Self {
        self.line(
            LineBuilder::new()
                .price(price)
                .kind(BillingKind::Uniform)
                .kit()
                .must_pay_in_full()
                .build(),
        )
    }

    pub fn issued_on(mut self, issue_date: NaiveDate) -> Self {
        self.issue_date = issue_date;
        self
    }

    pub fn due(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Leaves the invoice in draft
    pub fn draft(mut self) -> Self {
        self.issued = false;
        self
    }

    /// Creates the invoice in `book` and returns its id
    ///
    /// # Panics
    ///
    /// Panics if the book rejects any step; builders are for valid data.
    pub fn create_in(self, book: &mut PayerBook) -> InvoiceId {
        let number = StringFixtures::next_invoice_number();
        let invoice = book.create_invoice(self.invoice_type, number, None, None);
        for line in self.lines {
            book.add_line(invoice.id, line).expect("builder line is valid");
        }
        if self.issued {
            book.issue_invoice(invoice.id, self.issue_date, self.due_date, 30)
                .expect("builder invoice can be issued");
        }
        invoice.id
    }
}

/// Builder for a whole payer book
///
/// Steps run in the order they were added, so credit added before invoices
/// stays unallocated while credit added after them is auto-allocated.
pub struct PayerBookBuilder {
    payer_id: PayerId,
    steps: Vec<Step>,
}

enum Step {
    Invoice(InvoiceBuilder),
    Payment(Decimal),
    StandingDiscount(Option<BillingKind>, DiscountValueType, Decimal),
}

impl Default for PayerBookBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayerBookBuilder {
    pub fn new() -> Self {
        Self {
            payer_id: PayerId::new(),
            steps: Vec::new(),
        }
    }

    pub fn payer_id(mut self, payer_id: PayerId) -> Self {
        self.payer_id = payer_id;
        self
    }

    pub fn invoice(mut self, invoice: InvoiceBuilder) -> Self {
        self.steps.push(Step::Invoice(invoice));
        self
    }

    /// Adds a completed payment of `amount`
    pub fn payment(mut self, amount: Decimal) -> Self {
        self.steps.push(Step::Payment(amount));
        self
    }

    /// Adds a standing discount rule
    pub fn standing_discount(
        mut self,
        kind: Option<BillingKind>,
        value_type: DiscountValueType,
        value: Decimal,
    ) -> Self {
        self.steps.push(Step::StandingDiscount(kind, value_type, value));
        self
    }

    /// Replays the steps against an existing book, returning created invoice ids
    pub fn apply_to(self, book: &mut PayerBook) -> Vec<InvoiceId> {
        let mut invoices = Vec::new();
        for step in self.steps {
            match step {
                Step::Invoice(builder) => invoices.push(builder.create_in(book)),
                Step::Payment(amount) => {
                    let payment = book
                        .create_payment(amount, PaymentMethod::BankTransfer, DateFixtures::issue_date(), None)
                        .expect("builder payment is valid");
                    let receipt = StringFixtures::next_receipt_number();
                    book.complete_payment(payment.id, receipt)
                        .expect("builder payment completes");
                }
                Step::StandingDiscount(kind, value_type, value) => {
                    book.add_student_discount(kind, value_type, value, None)
                        .expect("builder discount is valid");
                }
            }
        }
        invoices
    }

    /// Builds the book along with the ids of the invoices it created
    pub fn build_with_ids(self) -> (PayerBook, Vec<InvoiceId>) {
        let mut book = PayerBook::new(self.payer_id);
        let ids = self.apply_to(&mut book);
        (book, ids)
    }

    pub fn build(self) -> PayerBook {
        self.build_with_ids().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_billing::InvoiceStatus;

    #[test]
    fn test_line_builder_defaults() {
        let line = LineBuilder::new().build();
        assert_eq!(line.unit_price, dec!(100.00));
        assert_eq!(line.quantity, Decimal::ONE);
        assert!(!line.must_pay_in_full);
        assert!(!line.description.is_empty());
    }

    #[test]
    fn test_invoice_builder_issues() {
        let mut book = PayerBook::new(PayerId::new());
        let id = InvoiceBuilder::new()
            .partial_line(dec!(300))
            .full_line(dec!(200))
            .create_in(&mut book);

        let invoice = book.invoice(id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Issued);
        assert_eq!(invoice.total, dec!(500));
        assert!(invoice.has_must_pay_in_full_line());
    }

    #[test]
    fn test_payer_book_builder_orders_steps() {
        let (book, ids) = PayerBookBuilder::new()
            .payment(dec!(50))
            .invoice(InvoiceBuilder::new().partial_line(dec!(100)))
            .build_with_ids();

        assert_eq!(book.available_credit(), dec!(50));
        assert_eq!(book.invoice(ids[0]).unwrap().paid_total, Decimal::ZERO);

        let (book, ids) = PayerBookBuilder::new()
            .invoice(InvoiceBuilder::new().partial_line(dec!(100)))
            .payment(dec!(50))
            .build_with_ids();

        assert_eq!(book.available_credit(), Decimal::ZERO);
        assert_eq!(book.invoice(ids[0]).unwrap().paid_total, dec!(50));
    }
}
