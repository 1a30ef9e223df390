//! Balance projection
//!
//! A payer's available credit is the sum of their completed payments minus
//! the sum of their allocations. The value is cached on the payer record;
//! every mutation of payments or allocations refreshes it, and
//! [`PayerBook::reconcile`] repairs it after manual data fixes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use core_kernel::PayerId;

use crate::allocation::CreditAllocation;
use crate::book::PayerBook;
use crate::payment::Payment;

/// Computes available credit from the source rows
pub fn available_credit(payments: &[Payment], allocations: &[CreditAllocation]) -> Decimal {
    let received: Decimal = payments
        .iter()
        .filter(|p| p.is_completed())
        .map(|p| p.amount)
        .sum();
    let allocated: Decimal = allocations.iter().map(|a| a.amount).sum();
    received - allocated
}

/// Result of comparing the cached credit with the recomputed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub payer_id: PayerId,
    /// Value found in the cache
    pub cached: Decimal,
    /// Value recomputed from payments and allocations
    pub recomputed: Decimal,
    /// `recomputed - cached`
    pub drift: Decimal,
}

impl Reconciliation {
    pub fn has_drift(&self) -> bool {
        !self.drift.is_zero()
    }
}

/// Point-in-time summary of a payer's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerStatement {
    pub payer_id: PayerId,
    pub as_of: NaiveDate,
    pub available_credit: Decimal,
    /// Amount due across issued and partially paid invoices
    pub total_outstanding: Decimal,
    pub open_invoices: usize,
    pub overdue_invoices: usize,
    /// Sum of completed payments
    pub total_paid: Decimal,
}

impl PayerBook {
    /// Overwrites the cached credit with the recomputed value
    ///
    /// Idempotent: a second call reports no drift.
    pub fn reconcile(&mut self) -> Reconciliation {
        let cached = self.available_credit;
        let recomputed = self.recomputed_credit();
        let result = Reconciliation {
            payer_id: self.payer_id,
            cached,
            recomputed,
            drift: recomputed - cached,
        };

        if result.has_drift() {
            warn!(
                payer_id = %self.payer_id,
                cached = %cached,
                recomputed = %recomputed,
                "Available credit drifted; cache repaired"
            );
            self.available_credit = recomputed;
            self.changes.payer = true;
        }
        result
    }

    /// Summarises the payer's position as of `today`
    pub fn statement(&self, today: NaiveDate) -> PayerStatement {
        let open = self.invoices.iter().filter(|i| i.status.is_open());

        PayerStatement {
            payer_id: self.payer_id,
            as_of: today,
            available_credit: self.recomputed_credit(),
            total_outstanding: open.clone().map(|i| i.amount_due).sum(),
            open_invoices: open.clone().count(),
            overdue_invoices: open.filter(|i| i.is_overdue(today)).count(),
            total_paid: self
                .payments
                .iter()
                .filter(|p| p.is_completed())
                .map(|p| p.amount)
                .sum(),
        }
    }

    /// Available credit recomputed from payments and allocations
    pub fn recomputed_credit(&self) -> Decimal {
        available_credit(&self.payments, &self.allocations)
    }

    /// Writes the recomputed credit into the cache
    pub(crate) fn refresh_credit(&mut self) {
        let recomputed = self.recomputed_credit();
        if recomputed != self.available_credit {
            self.available_credit = recomputed;
            self.changes.payer = true;
        }
    }
}
