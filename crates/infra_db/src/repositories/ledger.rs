//! Ledger repository implementation
//!
//! Row types and SQL for the billing ledger tables. Every read that feeds a
//! write takes row locks, and locks are always taken in the same order:
//! payer, invoices by due date, lines by invoice then id, then payments.
//! Two sessions for one payer therefore queue on the payer row and never
//! deadlock on the rest.
//!
//! Functions take a `&mut PgConnection` so the adapter can run them inside
//! its open transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Cached credit for one payer
#[derive(Debug, Clone, FromRow)]
pub struct PayerRow {
    pub payer_id: Uuid,
    pub available_credit: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub payer_id: Uuid,
    pub billing_period_id: Option<Uuid>,
    pub invoice_type: String,
    pub status: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub paid_total: Decimal,
    pub amount_due: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LineRow {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub catalog_item_kind: String,
    pub catalog_item_id: Uuid,
    pub description: String,
    pub billing_kind: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub discount_amount: Decimal,
    pub net_amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub must_pay_in_full: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DiscountRow {
    pub discount_id: Uuid,
    pub invoice_id: Uuid,
    pub line_id: Uuid,
    pub value_type: String,
    pub value: Decimal,
    pub calculated_amount: Decimal,
    pub reason: Option<String>,
    pub student_discount_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StudentDiscountRow {
    pub student_discount_id: Uuid,
    pub payer_id: Uuid,
    pub billing_kind: Option<String>,
    pub value_type: String,
    pub value: Decimal,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub payer_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub receipt_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AllocationRow {
    pub allocation_id: Uuid,
    pub payer_id: Uuid,
    pub invoice_id: Uuid,
    pub line_id: Option<Uuid>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Every row belonging to one payer, as loaded under lock
#[derive(Debug, Clone)]
pub struct PayerRows {
    pub payer: PayerRow,
    pub invoices: Vec<InvoiceRow>,
    pub lines: Vec<LineRow>,
    pub discounts: Vec<DiscountRow>,
    pub student_discounts: Vec<StudentDiscountRow>,
    pub payments: Vec<PaymentRow>,
    pub allocations: Vec<AllocationRow>,
}

/// Tables an entity id can be looked up in to find its payer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedTable {
    Invoices,
    InvoiceLines,
    Discounts,
    StudentDiscounts,
    Payments,
    CreditAllocations,
}

impl OwnedTable {
    fn owner_sql(&self) -> &'static str {
        match self {
            OwnedTable::Invoices => "SELECT payer_id FROM invoices WHERE invoice_id = $1",
            OwnedTable::InvoiceLines => {
                "SELECT i.payer_id FROM invoice_lines l \
                 JOIN invoices i ON i.invoice_id = l.invoice_id WHERE l.line_id = $1"
            }
            OwnedTable::Discounts => {
                "SELECT i.payer_id FROM discounts d \
                 JOIN invoices i ON i.invoice_id = d.invoice_id WHERE d.discount_id = $1"
            }
            OwnedTable::StudentDiscounts => {
                "SELECT payer_id FROM student_discounts WHERE student_discount_id = $1"
            }
            OwnedTable::Payments => "SELECT payer_id FROM payments WHERE payment_id = $1",
            OwnedTable::CreditAllocations => {
                "SELECT payer_id FROM credit_allocations WHERE allocation_id = $1"
            }
        }
    }
}

/// Repository for the billing ledger tables
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Finds the payer that owns `id` in `table`
    pub async fn find_owner(&self, table: OwnedTable, id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
        let owner = sqlx::query_scalar::<_, Uuid>(table.owner_sql())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner)
    }

    /// Lists every payer id in ascending order
    pub async fn list_payers(&self) -> Result<Vec<Uuid>, DatabaseError> {
        let payers = sqlx::query_scalar::<_, Uuid>("SELECT payer_id FROM payers ORDER BY payer_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(payers)
    }

    /// Returns the next value of the (`prefix`, `year`) counter
    ///
    /// Runs in its own statement on the pool, outside any ledger transaction,
    /// so an issued number is never handed out twice even if the caller's
    /// transaction later rolls back.
    pub async fn next_sequence(&self, prefix: &str, year: i32) -> Result<i64, DatabaseError> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO document_sequences (prefix, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year)
            DO UPDATE SET last_value = document_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}

// ----------------------------------------------------------------------------
// Locked reads
// ----------------------------------------------------------------------------

/// Loads and locks everything for one payer, creating the payer row if absent
pub async fn lock_payer_rows(conn: &mut PgConnection, payer_id: Uuid) -> Result<PayerRows, DatabaseError> {
    sqlx::query("INSERT INTO payers (payer_id) VALUES ($1) ON CONFLICT (payer_id) DO NOTHING")
        .bind(payer_id)
        .execute(&mut *conn)
        .await?;

    let payer = sqlx::query_as::<_, PayerRow>(
        "SELECT payer_id, available_credit FROM payers WHERE payer_id = $1 FOR UPDATE",
    )
    .bind(payer_id)
    .fetch_one(&mut *conn)
    .await?;

    let invoices = sqlx::query_as::<_, InvoiceRow>(
        r#"
        SELECT invoice_id, invoice_number, payer_id, billing_period_id, invoice_type, status,
            issue_date, due_date, subtotal, discount_total, total, paid_total, amount_due,
            notes, created_at, updated_at
        FROM invoices
        WHERE payer_id = $1
        ORDER BY due_date ASC NULLS LAST, invoice_id ASC
        FOR UPDATE
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    let lines = sqlx::query_as::<_, LineRow>(
        r#"
        SELECT l.line_id, l.invoice_id, l.catalog_item_kind, l.catalog_item_id, l.description,
            l.billing_kind, l.quantity, l.unit_price, l.line_total, l.discount_amount,
            l.net_amount, l.paid_amount, l.remaining_amount, l.must_pay_in_full,
            l.created_at, l.updated_at
        FROM invoice_lines l
        JOIN invoices i ON i.invoice_id = l.invoice_id
        WHERE i.payer_id = $1
        ORDER BY i.due_date ASC NULLS LAST, i.invoice_id ASC, l.line_id ASC
        FOR UPDATE OF l
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    let discounts = sqlx::query_as::<_, DiscountRow>(
        r#"
        SELECT d.discount_id, d.invoice_id, d.line_id, d.value_type, d.value,
            d.calculated_amount, d.reason, d.student_discount_id, d.created_at
        FROM discounts d
        JOIN invoices i ON i.invoice_id = d.invoice_id
        WHERE i.payer_id = $1
        ORDER BY d.created_at ASC, d.discount_id ASC
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    let student_discounts = sqlx::query_as::<_, StudentDiscountRow>(
        r#"
        SELECT student_discount_id, payer_id, billing_kind, value_type, value, reason,
            is_active, created_at, updated_at
        FROM student_discounts
        WHERE payer_id = $1
        ORDER BY created_at ASC, student_discount_id ASC
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    let payments = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT payment_id, payer_id, amount, method, status, payment_date, reference,
            receipt_number, cancellation_reason, completed_at, created_at, updated_at
        FROM payments
        WHERE payer_id = $1
        ORDER BY created_at ASC, payment_id ASC
        FOR UPDATE
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    let allocations = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT allocation_id, payer_id, invoice_id, line_id, amount, created_at
        FROM credit_allocations
        WHERE payer_id = $1
        ORDER BY created_at ASC, allocation_id ASC
        "#,
    )
    .bind(payer_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(PayerRows {
        payer,
        invoices,
        lines,
        discounts,
        student_discounts,
        payments,
        allocations,
    })
}

// ----------------------------------------------------------------------------
// Writes
// ----------------------------------------------------------------------------

pub async fn update_payer_credit(
    conn: &mut PgConnection,
    payer_id: Uuid,
    available_credit: Decimal,
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE payers SET available_credit = $2, updated_at = NOW() WHERE payer_id = $1")
        .bind(payer_id)
        .bind(available_credit)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn upsert_invoice(conn: &mut PgConnection, row: &InvoiceRow) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO invoices (
            invoice_id, invoice_number, payer_id, billing_period_id, invoice_type, status,
            issue_date, due_date, subtotal, discount_total, total, paid_total, amount_due,
            notes, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (invoice_id) DO UPDATE SET
            status = EXCLUDED.status,
            issue_date = EXCLUDED.issue_date,
            due_date = EXCLUDED.due_date,
            subtotal = EXCLUDED.subtotal,
            discount_total = EXCLUDED.discount_total,
            total = EXCLUDED.total,
            paid_total = EXCLUDED.paid_total,
            amount_due = EXCLUDED.amount_due,
            notes = EXCLUDED.notes,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.invoice_id)
    .bind(&row.invoice_number)
    .bind(row.payer_id)
    .bind(row.billing_period_id)
    .bind(&row.invoice_type)
    .bind(&row.status)
    .bind(row.issue_date)
    .bind(row.due_date)
    .bind(row.subtotal)
    .bind(row.discount_total)
    .bind(row.total)
    .bind(row.paid_total)
    .bind(row.amount_due)
    .bind(&row.notes)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn upsert_line(conn: &mut PgConnection, row: &LineRow) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO invoice_lines (
            line_id, invoice_id, catalog_item_kind, catalog_item_id, description, billing_kind,
            quantity, unit_price, line_total, discount_amount, net_amount, paid_amount,
            remaining_amount, must_pay_in_full, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (line_id) DO UPDATE SET
            discount_amount = EXCLUDED.discount_amount,
            net_amount = EXCLUDED.net_amount,
            paid_amount = EXCLUDED.paid_amount,
            remaining_amount = EXCLUDED.remaining_amount,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.line_id)
    .bind(row.invoice_id)
    .bind(&row.catalog_item_kind)
    .bind(row.catalog_item_id)
    .bind(&row.description)
    .bind(&row.billing_kind)
    .bind(row.quantity)
    .bind(row.unit_price)
    .bind(row.line_total)
    .bind(row.discount_amount)
    .bind(row.net_amount)
    .bind(row.paid_amount)
    .bind(row.remaining_amount)
    .bind(row.must_pay_in_full)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_lines(conn: &mut PgConnection, ids: &[Uuid]) -> Result<(), DatabaseError> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM invoice_lines WHERE line_id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_discount(conn: &mut PgConnection, row: &DiscountRow) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO discounts (
            discount_id, invoice_id, line_id, value_type, value, calculated_amount,
            reason, student_discount_id, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (discount_id) DO NOTHING
        "#,
    )
    .bind(row.discount_id)
    .bind(row.invoice_id)
    .bind(row.line_id)
    .bind(&row.value_type)
    .bind(row.value)
    .bind(row.calculated_amount)
    .bind(&row.reason)
    .bind(row.student_discount_id)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_discounts(conn: &mut PgConnection, ids: &[Uuid]) -> Result<(), DatabaseError> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM discounts WHERE discount_id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn upsert_student_discount(
    conn: &mut PgConnection,
    row: &StudentDiscountRow,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO student_discounts (
            student_discount_id, payer_id, billing_kind, value_type, value, reason,
            is_active, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (student_discount_id) DO UPDATE SET
            is_active = EXCLUDED.is_active,
            reason = EXCLUDED.reason,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.student_discount_id)
    .bind(row.payer_id)
    .bind(&row.billing_kind)
    .bind(&row.value_type)
    .bind(row.value)
    .bind(&row.reason)
    .bind(row.is_active)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn upsert_payment(conn: &mut PgConnection, row: &PaymentRow) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            payment_id, payer_id, amount, method, status, payment_date, reference,
            receipt_number, cancellation_reason, completed_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (payment_id) DO UPDATE SET
            status = EXCLUDED.status,
            reference = EXCLUDED.reference,
            receipt_number = EXCLUDED.receipt_number,
            cancellation_reason = EXCLUDED.cancellation_reason,
            completed_at = EXCLUDED.completed_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.payment_id)
    .bind(row.payer_id)
    .bind(row.amount)
    .bind(&row.method)
    .bind(&row.status)
    .bind(row.payment_date)
    .bind(&row.reference)
    .bind(&row.receipt_number)
    .bind(&row.cancellation_reason)
    .bind(row.completed_at)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_allocation(conn: &mut PgConnection, row: &AllocationRow) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO credit_allocations (allocation_id, payer_id, invoice_id, line_id, amount, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (allocation_id) DO NOTHING
        "#,
    )
    .bind(row.allocation_id)
    .bind(row.payer_id)
    .bind(row.invoice_id)
    .bind(row.line_id)
    .bind(row.amount)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_allocations(conn: &mut PgConnection, ids: &[Uuid]) -> Result<(), DatabaseError> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM credit_allocations WHERE allocation_id = ANY($1)")
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
