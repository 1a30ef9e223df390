//! Invoice lines
//!
//! A line bills one catalog product or kit. Its derived fields are always
//! recomputed from `unit_price`, `quantity`, `discount_amount` and
//! `paid_amount` through [`recompute_line`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{round2, CatalogItemId, InvoiceId, InvoiceLineId};

use crate::error::BillingError;

/// What a line bills; standing discounts are matched on this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingKind {
    /// Termly tuition fee
    Tuition,
    /// One-off admission fee
    Admission,
    /// Transport fee
    Transport,
    /// Uniform items
    Uniform,
    /// Meal plan
    Meals,
    /// Extra-curricular activity
    Activity,
    /// Anything else
    Other,
}

impl BillingKind {
    /// Returns the stored text form
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingKind::Tuition => "tuition",
            BillingKind::Admission => "admission",
            BillingKind::Transport => "transport",
            BillingKind::Uniform => "uniform",
            BillingKind::Meals => "meals",
            BillingKind::Activity => "activity",
            BillingKind::Other => "other",
        }
    }

    /// Parses the stored text form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tuition" => Some(BillingKind::Tuition),
            "admission" => Some(BillingKind::Admission),
            "transport" => Some(BillingKind::Transport),
            "uniform" => Some(BillingKind::Uniform),
            "meals" => Some(BillingKind::Meals),
            "activity" => Some(BillingKind::Activity),
            "other" => Some(BillingKind::Other),
            _ => None,
        }
    }
}

/// Kind of catalog entry a line refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogItemKind {
    /// A single product
    Product,
    /// A bundle of products
    Kit,
}

impl CatalogItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogItemKind::Product => "product",
            CatalogItemKind::Kit => "kit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(CatalogItemKind::Product),
            "kit" => Some(CatalogItemKind::Kit),
            _ => None,
        }
    }
}

/// Reference to the catalog product or kit a line bills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogItemRef {
    pub kind: CatalogItemKind,
    pub id: CatalogItemId,
}

impl CatalogItemRef {
    pub fn product(id: CatalogItemId) -> Self {
        Self { kind: CatalogItemKind::Product, id }
    }

    pub fn kit(id: CatalogItemId) -> Self {
        Self { kind: CatalogItemKind::Kit, id }
    }
}

/// Input for adding a line to a draft invoice
///
/// The unit price comes from the caller's pricing lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub catalog_item: CatalogItemRef,
    pub description: String,
    pub billing_kind: BillingKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub must_pay_in_full: bool,
}

impl NewInvoiceLine {
    /// Creates a single-quantity line that may be paid in instalments
    ///
    /// # Arguments
    ///
    /// * `catalog_item` - The product or kit being billed
    /// * `description` - Text shown on the invoice
    /// * `billing_kind` - Category used for standing discounts
    /// * `unit_price` - Price per unit
    pub fn new(
        catalog_item: CatalogItemRef,
        description: impl Into<String>,
        billing_kind: BillingKind,
        unit_price: Decimal,
    ) -> Self {
        Self {
            catalog_item,
            description: description.into(),
            billing_kind,
            quantity: Decimal::ONE,
            unit_price,
            must_pay_in_full: false,
        }
    }

    /// Sets the quantity
    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    /// Marks the line as payable only in full
    pub fn must_pay_in_full(mut self, flag: bool) -> Self {
        self.must_pay_in_full = flag;
        self
    }
}

/// A priced line on an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: InvoiceLineId,
    pub invoice_id: InvoiceId,
    pub catalog_item: CatalogItemRef,
    pub description: String,
    pub billing_kind: BillingKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// `unit_price * quantity`
    pub line_total: Decimal,
    pub discount_amount: Decimal,
    /// `line_total - discount_amount`
    pub net_amount: Decimal,
    pub paid_amount: Decimal,
    /// `net_amount - paid_amount`
    pub remaining_amount: Decimal,
    /// Inherited from the catalog item; drives allocation priority
    pub must_pay_in_full: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceLine {
    /// Builds a line for `invoice_id` from caller input
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` when the quantity is not positive or
    /// the unit price is negative.
    pub fn from_new(invoice_id: InvoiceId, new: NewInvoiceLine) -> Result<Self, BillingError> {
        let quantity = round2(new.quantity);
        let unit_price = round2(new.unit_price);

        if quantity <= Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "Line quantity must be positive, got {}",
                new.quantity
            )));
        }
        if unit_price < Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "Line unit price cannot be negative, got {}",
                new.unit_price
            )));
        }

        let now = Utc::now();
        let mut line = Self {
            id: InvoiceLineId::new(),
            invoice_id,
            catalog_item: new.catalog_item,
            description: new.description,
            billing_kind: new.billing_kind,
            quantity,
            unit_price,
            line_total: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            remaining_amount: Decimal::ZERO,
            must_pay_in_full: new.must_pay_in_full,
            created_at: now,
            updated_at: now,
        };
        recompute_line(&mut line)?;
        Ok(line)
    }

    /// Returns true once nothing remains to be paid
    pub fn is_fully_paid(&self) -> bool {
        self.remaining_amount.is_zero()
    }

    /// Headroom left for further discounts
    pub fn discount_headroom(&self) -> Decimal {
        self.line_total - self.discount_amount
    }
}

/// Recomputes the derived fields of a line
///
/// # Errors
///
/// Returns `BillingError::InvalidState` if the discount exceeds the line total,
/// the paid amount exceeds the net amount, or any amount is negative.
pub fn recompute_line(line: &mut InvoiceLine) -> Result<(), BillingError> {
    let line_total = round2(line.unit_price * line.quantity);
    let discount_amount = round2(line.discount_amount);
    let paid_amount = round2(line.paid_amount);

    if discount_amount < Decimal::ZERO || paid_amount < Decimal::ZERO {
        return Err(BillingError::invalid_state(format!(
            "Line {} has a negative amount (discount {}, paid {})",
            line.id, discount_amount, paid_amount
        )));
    }
    if discount_amount > line_total {
        return Err(BillingError::invalid_state(format!(
            "Line {} discount {} exceeds line total {}",
            line.id, discount_amount, line_total
        )));
    }

    let net_amount = line_total - discount_amount;
    if paid_amount > net_amount {
        return Err(BillingError::invalid_state(format!(
            "Line {} paid amount {} exceeds net amount {}",
            line.id, paid_amount, net_amount
        )));
    }

    line.line_total = line_total;
    line.discount_amount = discount_amount;
    line.net_amount = net_amount;
    line.paid_amount = paid_amount;
    line.remaining_amount = net_amount - paid_amount;
    line.updated_at = Utc::now();
    Ok(())
}
