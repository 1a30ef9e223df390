//! PostgreSQL Ledger Adapter
//!
//! Implements the billing domain's `LedgerStore` and `NumberGenerator` ports
//! on top of [`LedgerRepository`].
//!
//! # Overview
//!
//! `begin` opens a transaction, locks the payer row and everything the payer
//! owns, and rebuilds the payer's `PayerBook`. The book is mutated in memory;
//! `commit` writes back only the rows named in the book's change set, then
//! the cached credit, then commits. Dropping a session rolls the transaction
//! back.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresLedgerStore;
//! use domain_billing::{LedgerSession, LedgerStore};
//!
//! let store = PostgresLedgerStore::new(pool);
//! let mut session = store.begin(payer_id).await?;
//! session.book_mut().allocate_auto(None)?;
//! session.commit().await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    CatalogItemId, CreditAllocationId, DiscountId, DomainPort, HealthCheckResult,
    HealthCheckable, InvoiceId, InvoiceLineId, PayerId, PaymentId, PortError, StudentDiscountId,
};
use domain_billing::{
    BillingKind, CatalogItemKind, CatalogItemRef, CreditAllocation, Discount, DiscountValueType,
    EntityRef, Invoice, InvoiceLine, InvoiceStatus, InvoiceType, LedgerSession, LedgerStore,
    NumberGenerator, PayerBook, Payment, PaymentMethod, PaymentStatus, StudentDiscount,
};

use crate::error::{port_error, DatabaseError};
use crate::repositories::ledger::{
    self, AllocationRow, DiscountRow, InvoiceRow, LedgerRepository, LineRow, OwnedTable,
    PayerRows, PaymentRow, StudentDiscountRow,
};

const ADAPTER_ID: &str = "postgres-ledger-store";

/// PostgreSQL-backed implementation of the LedgerStore trait
///
/// # Locking
///
/// Sessions for one payer serialize on `SELECT ... FOR UPDATE` of the payer
/// row. Invoice and line locks follow in allocation order (oldest due date
/// first) so concurrent allocation runs cannot deadlock.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    repository: LedgerRepository,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: LedgerRepository::new(pool),
        }
    }

    /// Returns a reference to the underlying repository
    pub fn repository(&self) -> &LedgerRepository {
        &self.repository
    }
}

impl DomainPort for PostgresLedgerStore {}

#[async_trait]
impl HealthCheckable for PostgresLedgerStore {
    /// Checks database connectivity with `SELECT 1`
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.repository.pool())
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(ADAPTER_ID, latency_ms, format!("Database error: {}", e)),
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Session = PostgresLedgerSession;

    #[instrument(skip(self), fields(payer_id = %payer_id))]
    async fn begin(&self, payer_id: PayerId) -> Result<PostgresLedgerSession, PortError> {
        let mut tx = self.repository.pool().begin().await.map_err(port_error)?;
        let rows = ledger::lock_payer_rows(&mut tx, *payer_id.as_uuid()).await?;
        let book = rows_to_book(rows)?;

        debug!(
            invoices = book.invoices().len(),
            payments = book.payments().len(),
            "Ledger session opened"
        );
        Ok(PostgresLedgerSession { tx, book })
    }

    #[instrument(skip(self), fields(entity = %entity))]
    async fn resolve_payer(&self, entity: EntityRef) -> Result<PayerId, PortError> {
        let (table, id) = match entity {
            EntityRef::Invoice(id) => (OwnedTable::Invoices, *id.as_uuid()),
            EntityRef::Line(id) => (OwnedTable::InvoiceLines, *id.as_uuid()),
            EntityRef::Discount(id) => (OwnedTable::Discounts, *id.as_uuid()),
            EntityRef::StudentDiscount(id) => (OwnedTable::StudentDiscounts, *id.as_uuid()),
            EntityRef::Payment(id) => (OwnedTable::Payments, *id.as_uuid()),
            EntityRef::Allocation(id) => (OwnedTable::CreditAllocations, *id.as_uuid()),
        };

        self.repository
            .find_owner(table, id)
            .await?
            .map(PayerId::from_uuid)
            .ok_or_else(|| entity.not_found())
    }

    async fn list_payers(&self) -> Result<Vec<PayerId>, PortError> {
        let payers = self.repository.list_payers().await?;
        Ok(payers.into_iter().map(PayerId::from_uuid).collect())
    }
}

/// An open ledger transaction for one payer
pub struct PostgresLedgerSession {
    tx: Transaction<'static, Postgres>,
    book: PayerBook,
}

#[async_trait]
impl LedgerSession for PostgresLedgerSession {
    fn book(&self) -> &PayerBook {
        &self.book
    }

    fn book_mut(&mut self) -> &mut PayerBook {
        &mut self.book
    }

    #[instrument(skip(self), fields(payer_id = %self.book.payer_id()))]
    async fn commit(mut self) -> Result<(), PortError> {
        let changes = self.book.take_changes();
        let conn = &mut *self.tx;

        // Deletes first so re-inserted rows never collide
        let deleted: Vec<Uuid> = changes.deleted_discounts.iter().map(|id| *id.as_uuid()).collect();
        ledger::delete_discounts(conn, &deleted).await?;
        let deleted: Vec<Uuid> = changes.deleted_allocations.iter().map(|id| *id.as_uuid()).collect();
        ledger::delete_allocations(conn, &deleted).await?;
        let deleted: Vec<Uuid> = changes.deleted_lines.iter().map(|id| *id.as_uuid()).collect();
        ledger::delete_lines(conn, &deleted).await?;

        for rule in self.book.student_discounts() {
            if changes.student_discounts.contains(&rule.id) {
                ledger::upsert_student_discount(conn, &student_discount_row(rule)).await?;
            }
        }

        for invoice in self.book.invoices() {
            if !changes.invoices.contains(&invoice.id) {
                continue;
            }
            ledger::upsert_invoice(conn, &invoice_row(invoice)).await?;
            for line in &invoice.lines {
                ledger::upsert_line(conn, &line_row(line)).await?;
            }
        }

        for discount in self.book.discounts() {
            if changes.discounts.contains(&discount.id) {
                ledger::insert_discount(conn, &discount_row(discount)).await?;
            }
        }

        for payment in self.book.payments() {
            if changes.payments.contains(&payment.id) {
                ledger::upsert_payment(conn, &payment_row(payment)).await?;
            }
        }

        for allocation in self.book.allocations() {
            if changes.allocations.contains(&allocation.id) {
                ledger::insert_allocation(conn, &allocation_row(allocation)).await?;
            }
        }

        if changes.payer {
            ledger::update_payer_credit(conn, *self.book.payer_id().as_uuid(), self.book.available_credit())
                .await?;
        }

        self.tx.commit().await.map_err(|e| {
            PortError::from(DatabaseError::TransactionFailed(e.to_string()))
        })?;

        debug!(
            invoices = changes.invoices.len(),
            payments = changes.payments.len(),
            allocations = changes.allocations.len(),
            "Ledger session committed"
        );
        Ok(())
    }

    async fn rollback(self) -> Result<(), PortError> {
        self.tx.rollback().await.map_err(port_error)
    }
}

/// Document numbers backed by the `document_sequences` table
///
/// Produces `PREFIX-YEAR-NNNNNN`, matching the in-memory generator.
#[derive(Debug, Clone)]
pub struct PostgresNumberGenerator {
    repository: LedgerRepository,
}

impl PostgresNumberGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: LedgerRepository::new(pool),
        }
    }
}

impl DomainPort for PostgresNumberGenerator {}

#[async_trait]
impl NumberGenerator for PostgresNumberGenerator {
    #[instrument(skip(self))]
    async fn generate(&self, prefix: &str, year: i32) -> Result<String, PortError> {
        let value = self.repository.next_sequence(prefix, year).await?;
        Ok(format!("{}-{}-{:06}", prefix, year, value))
    }
}

// ----------------------------------------------------------------------------
// Row <-> domain mapping
// ----------------------------------------------------------------------------

fn parse_column<T>(value: &str, column: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, PortError> {
    parse(value).ok_or_else(|| PortError::internal(format!("Unknown {} '{}' in database", column, value)))
}

/// Rebuilds a payer's book from locked rows
fn rows_to_book(rows: PayerRows) -> Result<PayerBook, PortError> {
    let mut lines_by_invoice: HashMap<Uuid, Vec<InvoiceLine>> = HashMap::new();
    for row in rows.lines {
        lines_by_invoice
            .entry(row.invoice_id)
            .or_default()
            .push(row_to_line(row)?);
    }

    let mut invoices = Vec::with_capacity(rows.invoices.len());
    for row in rows.invoices {
        let mut lines = lines_by_invoice.remove(&row.invoice_id).unwrap_or_default();
        lines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        invoices.push(row_to_invoice(row, lines)?);
    }

    let discounts = rows
        .discounts
        .into_iter()
        .map(row_to_discount)
        .collect::<Result<Vec<_>, _>>()?;
    let student_discounts = rows
        .student_discounts
        .into_iter()
        .map(row_to_student_discount)
        .collect::<Result<Vec<_>, _>>()?;
    let payments = rows
        .payments
        .into_iter()
        .map(row_to_payment)
        .collect::<Result<Vec<_>, _>>()?;
    let allocations = rows.allocations.into_iter().map(row_to_allocation).collect();

    Ok(PayerBook::from_parts(
        PayerId::from_uuid(rows.payer.payer_id),
        rows.payer.available_credit,
        invoices,
        discounts,
        student_discounts,
        payments,
        allocations,
    ))
}

fn row_to_invoice(row: InvoiceRow, lines: Vec<InvoiceLine>) -> Result<Invoice, PortError> {
    Ok(Invoice {
        id: InvoiceId::from_uuid(row.invoice_id),
        invoice_number: row.invoice_number,
        payer_id: PayerId::from_uuid(row.payer_id),
        billing_period_id: row.billing_period_id.map(Into::into),
        invoice_type: parse_column(&row.invoice_type, "invoice type", InvoiceType::parse)?,
        status: parse_column(&row.status, "invoice status", InvoiceStatus::parse)?,
        issue_date: row.issue_date,
        due_date: row.due_date,
        subtotal: row.subtotal,
        discount_total: row.discount_total,
        total: row.total,
        paid_total: row.paid_total,
        amount_due: row.amount_due,
        notes: row.notes,
        lines,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn invoice_row(invoice: &Invoice) -> InvoiceRow {
    InvoiceRow {
        invoice_id: *invoice.id.as_uuid(),
        invoice_number: invoice.invoice_number.clone(),
        payer_id: *invoice.payer_id.as_uuid(),
        billing_period_id: invoice.billing_period_id.map(Into::into),
        invoice_type: invoice.invoice_type.as_str().to_string(),
        status: invoice.status.as_str().to_string(),
        issue_date: invoice.issue_date,
        due_date: invoice.due_date,
        subtotal: invoice.subtotal,
        discount_total: invoice.discount_total,
        total: invoice.total,
        paid_total: invoice.paid_total,
        amount_due: invoice.amount_due,
        notes: invoice.notes.clone(),
        created_at: invoice.created_at,
        updated_at: invoice.updated_at,
    }
}

fn row_to_line(row: LineRow) -> Result<InvoiceLine, PortError> {
    let kind = parse_column(&row.catalog_item_kind, "catalog item kind", CatalogItemKind::parse)?;
    Ok(InvoiceLine {
        id: InvoiceLineId::from_uuid(row.line_id),
        invoice_id: InvoiceId::from_uuid(row.invoice_id),
        catalog_item: CatalogItemRef {
            kind,
            id: CatalogItemId::from_uuid(row.catalog_item_id),
        },
        description: row.description,
        billing_kind: parse_column(&row.billing_kind, "billing kind", BillingKind::parse)?,
        quantity: row.quantity,
        unit_price: row.unit_price,
        line_total: row.line_total,
        discount_amount: row.discount_amount,
        net_amount: row.net_amount,
        paid_amount: row.paid_amount,
        remaining_amount: row.remaining_amount,
        must_pay_in_full: row.must_pay_in_full,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn line_row(line: &InvoiceLine) -> LineRow {
    LineRow {
        line_id: *line.id.as_uuid(),
        invoice_id: *line.invoice_id.as_uuid(),
        catalog_item_kind: line.catalog_item.kind.as_str().to_string(),
        catalog_item_id: *line.catalog_item.id.as_uuid(),
        description: line.description.clone(),
        billing_kind: line.billing_kind.as_str().to_string(),
        quantity: line.quantity,
        unit_price: line.unit_price,
        line_total: line.line_total,
        discount_amount: line.discount_amount,
        net_amount: line.net_amount,
        paid_amount: line.paid_amount,
        remaining_amount: line.remaining_amount,
        must_pay_in_full: line.must_pay_in_full,
        created_at: line.created_at,
        updated_at: line.updated_at,
    }
}

fn row_to_discount(row: DiscountRow) -> Result<Discount, PortError> {
    Ok(Discount {
        id: DiscountId::from_uuid(row.discount_id),
        invoice_id: InvoiceId::from_uuid(row.invoice_id),
        line_id: InvoiceLineId::from_uuid(row.line_id),
        value_type: parse_column(&row.value_type, "discount value type", DiscountValueType::parse)?,
        value: row.value,
        calculated_amount: row.calculated_amount,
        reason: row.reason,
        student_discount_id: row.student_discount_id.map(StudentDiscountId::from_uuid),
        created_at: row.created_at,
    })
}

fn discount_row(discount: &Discount) -> DiscountRow {
    DiscountRow {
        discount_id: *discount.id.as_uuid(),
        invoice_id: *discount.invoice_id.as_uuid(),
        line_id: *discount.line_id.as_uuid(),
        value_type: discount.value_type.as_str().to_string(),
        value: discount.value,
        calculated_amount: discount.calculated_amount,
        reason: discount.reason.clone(),
        student_discount_id: discount.student_discount_id.map(Into::into),
        created_at: discount.created_at,
    }
}

fn row_to_student_discount(row: StudentDiscountRow) -> Result<StudentDiscount, PortError> {
    let billing_kind = match row.billing_kind.as_deref() {
        Some(kind) => Some(parse_column(kind, "billing kind", BillingKind::parse)?),
        None => None,
    };
    Ok(StudentDiscount {
        id: StudentDiscountId::from_uuid(row.student_discount_id),
        payer_id: PayerId::from_uuid(row.payer_id),
        billing_kind,
        value_type: parse_column(&row.value_type, "discount value type", DiscountValueType::parse)?,
        value: row.value,
        reason: row.reason,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn student_discount_row(rule: &StudentDiscount) -> StudentDiscountRow {
    StudentDiscountRow {
        student_discount_id: *rule.id.as_uuid(),
        payer_id: *rule.payer_id.as_uuid(),
        billing_kind: rule.billing_kind.map(|k| k.as_str().to_string()),
        value_type: rule.value_type.as_str().to_string(),
        value: rule.value,
        reason: rule.reason.clone(),
        is_active: rule.is_active,
        created_at: rule.created_at,
        updated_at: rule.updated_at,
    }
}

fn row_to_payment(row: PaymentRow) -> Result<Payment, PortError> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.payment_id),
        payer_id: PayerId::from_uuid(row.payer_id),
        amount: row.amount,
        method: parse_column(&row.method, "payment method", PaymentMethod::parse)?,
        status: parse_column(&row.status, "payment status", PaymentStatus::parse)?,
        payment_date: row.payment_date,
        reference: row.reference,
        receipt_number: row.receipt_number,
        cancellation_reason: row.cancellation_reason,
        completed_at: row.completed_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn payment_row(payment: &Payment) -> PaymentRow {
    PaymentRow {
        payment_id: *payment.id.as_uuid(),
        payer_id: *payment.payer_id.as_uuid(),
        amount: payment.amount,
        method: payment.method.as_str().to_string(),
        status: payment.status.as_str().to_string(),
        payment_date: payment.payment_date,
        reference: payment.reference.clone(),
        receipt_number: payment.receipt_number.clone(),
        cancellation_reason: payment.cancellation_reason.clone(),
        completed_at: payment.completed_at,
        created_at: payment.created_at,
        updated_at: payment.updated_at,
    }
}

fn row_to_allocation(row: AllocationRow) -> CreditAllocation {
    CreditAllocation {
        id: CreditAllocationId::from_uuid(row.allocation_id),
        payer_id: PayerId::from_uuid(row.payer_id),
        invoice_id: InvoiceId::from_uuid(row.invoice_id),
        line_id: row.line_id.map(InvoiceLineId::from_uuid),
        amount: row.amount,
        created_at: row.created_at,
    }
}

fn allocation_row(allocation: &CreditAllocation) -> AllocationRow {
    AllocationRow {
        allocation_id: *allocation.id.as_uuid(),
        payer_id: *allocation.payer_id.as_uuid(),
        invoice_id: *allocation.invoice_id.as_uuid(),
        line_id: allocation.line_id.map(Into::into),
        amount: allocation.amount,
        created_at: allocation.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn payer_rows(payer_id: Uuid) -> PayerRows {
        PayerRows {
            payer: ledger::PayerRow {
                payer_id,
                available_credit: dec!(25.00),
            },
            invoices: Vec::new(),
            lines: Vec::new(),
            discounts: Vec::new(),
            student_discounts: Vec::new(),
            payments: Vec::new(),
            allocations: Vec::new(),
        }
    }

    #[test]
    fn test_invoice_with_lines_survives_mapping() {
        let mut book = PayerBook::new(PayerId::new());
        let invoice = book.create_invoice(InvoiceType::Term, "INV-2026-000001", None, None);
        book.add_line(
            invoice.id,
            domain_billing::NewInvoiceLine::new(
                CatalogItemRef::kit(CatalogItemId::new()),
                "Uniform kit",
                BillingKind::Uniform,
                dec!(120.00),
            )
            .must_pay_in_full(true),
        )
        .unwrap();
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        book.issue_invoice(invoice.id, due, Some(due), 30).unwrap();
        let original = book.invoice(invoice.id).unwrap().clone();

        let mut rows = payer_rows(*book.payer_id().as_uuid());
        rows.invoices.push(invoice_row(&original));
        rows.lines.extend(original.lines.iter().map(line_row));

        let rebuilt = rows_to_book(rows).unwrap();
        assert_eq!(rebuilt.invoice(invoice.id).unwrap(), &original);
        assert_eq!(rebuilt.available_credit(), dec!(25.00));
        assert!(rebuilt.changes().is_empty());
    }

    #[test]
    fn test_unknown_status_is_internal_error() {
        let payment = Payment::new(
            PayerId::new(),
            dec!(10),
            PaymentMethod::Cash,
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        )
        .unwrap();
        let mut row = payment_row(&payment);
        row.status = "refunded".to_string();

        let error = row_to_payment(row).unwrap_err();
        assert!(matches!(error, PortError::Internal { .. }));
        assert!(error.to_string().contains("refunded"));
    }

    #[test]
    fn test_legacy_allocation_keeps_missing_line() {
        let row = AllocationRow {
            allocation_id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            line_id: None,
            amount: dec!(40.00),
            created_at: Utc::now(),
        };
        let allocation = row_to_allocation(row.clone());
        assert!(allocation.line_id.is_none());
        assert_eq!(allocation_row(&allocation).amount, row.amount);
    }
}
