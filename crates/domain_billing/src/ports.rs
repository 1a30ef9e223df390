//! Billing Domain Ports
//!
//! The ledger needs three things from the outside world:
//!
//! - **LedgerStore**: loads a payer's [`PayerBook`] under that payer's lock
//!   and persists the rows an operation touched, atomically
//! - **NumberGenerator**: issues unique, monotonic document numbers
//! - **AuditSink**: records who changed what, fire-and-forget
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut session = store.begin(payer_id).await?;
//! let outcome = session.book_mut().allocate_auto(None)?;
//! session.commit().await?;
//! ```
//!
//! Dropping a session without committing discards every change.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    CreditAllocationId, DiscountId, DomainPort, HealthCheckable, InvoiceId, InvoiceLineId,
    OperationMetadata, PayerId, PaymentId, PortError, StudentDiscountId,
};

use crate::book::PayerBook;

/// Reference to any entity the store can map back to its payer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Invoice(InvoiceId),
    Line(InvoiceLineId),
    Discount(DiscountId),
    StudentDiscount(StudentDiscountId),
    Payment(PaymentId),
    Allocation(CreditAllocationId),
}

impl EntityRef {
    /// Entity type name used in errors and audit entries
    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityRef::Invoice(_) => "Invoice",
            EntityRef::Line(_) => "InvoiceLine",
            EntityRef::Discount(_) => "Discount",
            EntityRef::StudentDiscount(_) => "StudentDiscount",
            EntityRef::Payment(_) => "Payment",
            EntityRef::Allocation(_) => "CreditAllocation",
        }
    }

    /// The identifier in display form
    pub fn id_string(&self) -> String {
        match self {
            EntityRef::Invoice(id) => id.to_string(),
            EntityRef::Line(id) => id.to_string(),
            EntityRef::Discount(id) => id.to_string(),
            EntityRef::StudentDiscount(id) => id.to_string(),
            EntityRef::Payment(id) => id.to_string(),
            EntityRef::Allocation(id) => id.to_string(),
        }
    }

    /// Error for an entity the store does not know
    pub fn not_found(&self) -> PortError {
        PortError::not_found(self.entity_type(), self.id_string())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id_string())
    }
}

/// Storage for payer books
///
/// Implementations must serialize sessions for the same payer: while one
/// session is open, `begin` for that payer waits.
#[async_trait]
pub trait LedgerStore: DomainPort + HealthCheckable {
    /// Session type holding the payer's lock and transaction
    type Session: LedgerSession;

    /// Opens a session for `payer_id`, creating an empty payer if none exists
    ///
    /// # Errors
    ///
    /// Returns `PortError::Connection` or `PortError::Timeout` if the backing
    /// store is unreachable.
    async fn begin(&self, payer_id: PayerId) -> Result<Self::Session, PortError>;

    /// Finds the payer that owns an entity
    ///
    /// # Returns
    ///
    /// The owning payer, or `PortError::NotFound`
    async fn resolve_payer(&self, entity: EntityRef) -> Result<PayerId, PortError>;

    /// Lists every payer the store knows, in id order
    async fn list_payers(&self) -> Result<Vec<PayerId>, PortError>;
}

/// One payer's book, loaded under lock
#[async_trait]
pub trait LedgerSession: Send {
    fn book(&self) -> &PayerBook;

    fn book_mut(&mut self) -> &mut PayerBook;

    /// Persists the book's pending changes and releases the lock
    async fn commit(self) -> Result<(), PortError>;

    /// Discards all changes and releases the lock
    async fn rollback(self) -> Result<(), PortError>;
}

/// Issues document numbers
#[async_trait]
pub trait NumberGenerator: DomainPort {
    /// Returns the next number for (`prefix`, `year`)
    ///
    /// Numbers are unique and increase monotonically per prefix and year.
    async fn generate(&self, prefix: &str, year: i32) -> Result<String, PortError>;
}

/// One audit trail record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates an entry for `action` on an entity
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl fmt::Display,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            user_id: None,
            correlation_id: None,
            old_values: None,
            new_values: None,
            recorded_at: Utc::now(),
        }
    }

    /// Copies the user and correlation id from operation metadata
    pub fn with_metadata(mut self, metadata: &OperationMetadata) -> Self {
        self.user_id = metadata.initiated_by.clone();
        self.correlation_id = metadata.correlation_id.clone();
        self
    }

    pub fn with_old_values(mut self, values: serde_json::Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new_values(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Receives audit entries after a change has been committed
#[async_trait]
pub trait AuditSink: DomainPort {
    /// Records an entry; failures never undo the change being audited
    async fn log(&self, entry: AuditEntry) -> Result<(), PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_not_found() {
        let id = PaymentId::new();
        let error = EntityRef::Payment(id).not_found();
        assert!(error.is_not_found());
        assert!(error.to_string().contains("Payment"));
        assert!(error.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_audit_entry_metadata() {
        let metadata = OperationMetadata::initiated_by("bursar").with_context("desk", "front");
        let entry = AuditEntry::new("payment.completed", "Payment", "PAY-1")
            .with_metadata(&metadata)
            .with_new_values(serde_json::json!({ "amount": "10.00" }));

        assert_eq!(entry.user_id.as_deref(), Some("bursar"));
        assert!(entry.old_values.is_none());
        assert_eq!(entry.new_values.unwrap()["amount"], "10.00");
    }
}
