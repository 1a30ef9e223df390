//! Payment lifecycle
//!
//! A payment is the only source of new credit. It never references an
//! invoice; completing it makes its amount available to the allocation
//! engine.
//!
//! ```text
//! pending ──complete──▶ completed
//!    │
//!    └────cancel──────▶ cancelled
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use core_kernel::{round2, PayerId, PaymentId};

use crate::allocation::AllocationOutcome;
use crate::book::PayerBook;
use crate::error::BillingError;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Card,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Card => "card",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "mobile_money" => Some(PaymentMethod::MobileMoney),
            "card" => Some(PaymentMethod::Card),
            "cheque" => Some(PaymentMethod::Cheque),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded but not yet confirmed
    Pending,
    /// Confirmed; counts towards available credit
    Completed,
    /// Abandoned before completion
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

/// A payment received from a payer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Who paid
    pub payer_id: PayerId,
    /// Amount received
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Date the money was received
    pub payment_date: NaiveDate,
    /// External transaction id (bank reference, mobile money code)
    pub reference: Option<String>,
    /// Assigned exactly once, on completion
    pub receipt_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment
    ///
    /// # Arguments
    ///
    /// * `payer_id` - Who is paying
    /// * `amount` - Amount received, rounded to cents
    /// * `method` - How it was paid
    /// * `payment_date` - When it was received
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the rounded amount is not positive.
    pub fn new(
        payer_id: PayerId,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
    ) -> Result<Self, BillingError> {
        let amount = round2(amount);
        if amount <= Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "Payment amount must be positive, got {}",
                amount
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            payer_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            payment_date,
            reference: None,
            receipt_number: None,
            cancellation_reason: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets the external reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// Marks a pending payment completed under `receipt_number`
    pub fn complete(&mut self, receipt_number: impl Into<String>) -> Result<(), BillingError> {
        self.ensure_pending("complete")?;
        let now = Utc::now();
        self.status = PaymentStatus::Completed;
        self.receipt_number = Some(receipt_number.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Cancels a pending payment
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), BillingError> {
        self.ensure_pending("cancel")?;
        self.status = PaymentStatus::Cancelled;
        self.cancellation_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> Result<(), BillingError> {
        if self.status != PaymentStatus::Pending {
            return Err(BillingError::validation(format!(
                "Cannot {} payment {}: it is {}",
                action,
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

impl PayerBook {
    /// Records a pending payment for this payer
    pub fn create_payment(
        &mut self,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
        reference: Option<String>,
    ) -> Result<Payment, BillingError> {
        let mut payment = Payment::new(self.payer_id, amount, method, payment_date)?;
        payment.reference = reference;

        self.changes.mark_payment(payment.id);
        self.payments.push(payment.clone());
        Ok(payment)
    }

    /// Completes a pending payment and auto-allocates the payer's credit
    ///
    /// The receipt number must come from the number generator; it is never
    /// reused, even if this call fails afterwards.
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` if the payment is not in this book
    /// - `BillingError::Validation` if the payment is not pending
    pub fn complete_payment(
        &mut self,
        payment_id: PaymentId,
        receipt_number: impl Into<String>,
    ) -> Result<(Payment, AllocationOutcome), BillingError> {
        let receipt_number = receipt_number.into();
        self.atomically(|book| {
            let payment = book
                .payments
                .iter_mut()
                .find(|p| p.id == payment_id)
                .ok_or_else(|| BillingError::not_found("Payment", payment_id))?;
            payment.complete(receipt_number)?;
            let payment = payment.clone();

            book.changes.mark_payment(payment_id);
            book.refresh_credit();

            info!(
                payment_id = %payment.id,
                receipt = payment.receipt_number.as_deref().unwrap_or_default(),
                amount = %payment.amount,
                "Payment completed"
            );

            let outcome = book.allocate_auto_in(None)?;
            Ok((payment, outcome))
        })
    }

    /// Cancels a pending payment
    pub fn cancel_payment(
        &mut self,
        payment_id: PaymentId,
        reason: impl Into<String>,
    ) -> Result<Payment, BillingError> {
        let payment = self
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| BillingError::not_found("Payment", payment_id))?;
        payment.cancel(reason)?;
        let payment = payment.clone();

        self.changes.mark_payment(payment_id);
        Ok(payment)
    }
}
