//! Property-Based Test Generators
//!
//! Proptest strategies for ledger inputs. Every value they produce is
//! accepted by the ledger, so properties can focus on invariants rather
//! than on rejected input.

use proptest::prelude::*;
use rust_decimal::Decimal;

use domain_billing::{BillingKind, DiscountValueType, PaymentMethod};

/// Strategy for a whole-cent amount between `min_cents` and `max_cents`
pub fn cents_strategy(min_cents: i64, max_cents: i64) -> impl Strategy<Value = Decimal> {
    (min_cents..=max_cents).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for positive amounts up to 100,000.00
pub fn positive_amount_strategy() -> impl Strategy<Value = Decimal> {
    cents_strategy(1, 10_000_000)
}

/// Strategy for one line: (price, must_pay_in_full)
pub fn line_spec_strategy() -> impl Strategy<Value = (Decimal, bool)> {
    (cents_strategy(100, 1_000_000), prop::bool::weighted(0.25))
}

/// Strategy for several invoices, each with one to four lines
pub fn invoice_specs_strategy(max_invoices: usize) -> impl Strategy<Value = Vec<Vec<(Decimal, bool)>>> {
    prop::collection::vec(prop::collection::vec(line_spec_strategy(), 1..=4), 1..=max_invoices)
}

/// Strategy for a discount that is always valid on a line of at least 1.00
pub fn discount_strategy() -> impl Strategy<Value = (DiscountValueType, Decimal)> {
    prop_oneof![
        cents_strategy(1, 10_000).prop_map(|p| (DiscountValueType::Percentage, p)),
        cents_strategy(1, 100_000).prop_map(|v| (DiscountValueType::Fixed, v)),
    ]
}

/// Strategy for billing kinds
pub fn billing_kind_strategy() -> impl Strategy<Value = BillingKind> {
    prop_oneof![
        Just(BillingKind::Tuition),
        Just(BillingKind::Admission),
        Just(BillingKind::Transport),
        Just(BillingKind::Uniform),
        Just(BillingKind::Meals),
        Just(BillingKind::Activity),
        Just(BillingKind::Other),
    ]
}

/// Strategy for payment methods
pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Cash),
        Just(PaymentMethod::BankTransfer),
        Just(PaymentMethod::MobileMoney),
        Just(PaymentMethod::Card),
        Just(PaymentMethod::Cheque),
        Just(PaymentMethod::Other),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::assert_book_consistent;
    use crate::builders::{InvoiceBuilder, LineBuilder, PayerBookBuilder};

    proptest! {
        #[test]
        fn test_cents_have_two_places(amount in positive_amount_strategy()) {
            prop_assert_eq!(amount.round_dp(2), amount);
            prop_assert!(amount > Decimal::ZERO);
        }

        #[test]
        fn test_random_books_stay_consistent(
            specs in invoice_specs_strategy(4),
            payment in positive_amount_strategy(),
        ) {
            let mut builder = PayerBookBuilder::new();
            for lines in specs {
                let mut invoice = InvoiceBuilder::new();
                for (price, full) in lines {
                    let mut line = LineBuilder::new().price(price);
                    if full {
                        line = line.must_pay_in_full();
                    }
                    invoice = invoice.line(line.build());
                }
                builder = builder.invoice(invoice);
            }
            let book = builder.payment(payment).build();
            assert_book_consistent(&book);
        }
    }
}
