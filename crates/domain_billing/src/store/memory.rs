//! In-memory ledger store
//!
//! Each payer's book sits behind its own `tokio::sync::Mutex`. A session
//! holds the payer's lock for its whole lifetime and works on a copy of the
//! book, which replaces the stored book only on commit. Sessions for
//! different payers never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use core_kernel::{
    DomainPort, HealthCheckResult, HealthCheckable, PayerId, PortError,
};

use crate::book::PayerBook;
use crate::ports::{EntityRef, LedgerSession, LedgerStore, NumberGenerator};

type EntityIndex = Arc<RwLock<HashMap<EntityRef, PayerId>>>;

/// Ledger store kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    books: Arc<RwLock<HashMap<PayerId, Arc<Mutex<PayerBook>>>>>,
    index: EntityIndex,
}

impl InMemoryLedgerStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with books
    ///
    /// Pending change sets on the books are discarded.
    pub async fn with_books(books: Vec<PayerBook>) -> Self {
        let store = Self::new();
        {
            let mut slots = store.books.write().await;
            let mut index = store.index.write().await;
            for mut book in books {
                book.take_changes();
                for entity in entities_of(&book) {
                    index.insert(entity, book.payer_id());
                }
                slots.insert(book.payer_id(), Arc::new(Mutex::new(book)));
            }
        }
        store
    }

    /// Returns a copy of the committed book, waiting for any open session
    pub async fn snapshot(&self, payer_id: PayerId) -> Option<PayerBook> {
        let slot = self.books.read().await.get(&payer_id).cloned()?;
        let book = slot.lock().await;
        Some(book.clone())
    }

    async fn slot(&self, payer_id: PayerId) -> Arc<Mutex<PayerBook>> {
        if let Some(slot) = self.books.read().await.get(&payer_id) {
            return slot.clone();
        }
        self.books
            .write()
            .await
            .entry(payer_id)
            .or_insert_with(|| Arc::new(Mutex::new(PayerBook::new(payer_id))))
            .clone()
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let payers = self.books.read().await.len();
        HealthCheckResult::healthy("in-memory-ledger-store", 0)
            .with_message(format!("{} payers loaded", payers))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Session = InMemorySession;

    async fn begin(&self, payer_id: PayerId) -> Result<InMemorySession, PortError> {
        let guard = self.slot(payer_id).await.lock_owned().await;
        let working = guard.clone();
        debug!(payer_id = %payer_id, "In-memory session opened");

        Ok(InMemorySession {
            guard,
            working,
            index: self.index.clone(),
        })
    }

    async fn resolve_payer(&self, entity: EntityRef) -> Result<PayerId, PortError> {
        self.index
            .read()
            .await
            .get(&entity)
            .copied()
            .ok_or_else(|| entity.not_found())
    }

    async fn list_payers(&self) -> Result<Vec<PayerId>, PortError> {
        let mut payers: Vec<PayerId> = self.books.read().await.keys().copied().collect();
        payers.sort();
        Ok(payers)
    }
}

/// An open in-memory session; holds the payer's lock until dropped
pub struct InMemorySession {
    guard: OwnedMutexGuard<PayerBook>,
    working: PayerBook,
    index: EntityIndex,
}

#[async_trait]
impl LedgerSession for InMemorySession {
    fn book(&self) -> &PayerBook {
        &self.working
    }

    fn book_mut(&mut self) -> &mut PayerBook {
        &mut self.working
    }

    async fn commit(mut self) -> Result<(), PortError> {
        let payer_id = self.working.payer_id();
        let changes = self.working.take_changes();

        {
            let mut index = self.index.write().await;
            index.retain(|_, owner| *owner != payer_id);
            for entity in entities_of(&self.working) {
                index.insert(entity, payer_id);
            }
        }

        debug!(
            payer_id = %payer_id,
            invoices = changes.invoices.len(),
            payments = changes.payments.len(),
            allocations = changes.allocations.len(),
            "In-memory session committed"
        );
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PortError> {
        debug!(payer_id = %self.working.payer_id(), "In-memory session rolled back");
        Ok(())
    }
}

/// Every entity a book owns, for the payer index
fn entities_of(book: &PayerBook) -> Vec<EntityRef> {
    let mut entities = Vec::new();
    for invoice in book.invoices() {
        entities.push(EntityRef::Invoice(invoice.id));
        entities.extend(invoice.lines.iter().map(|l| EntityRef::Line(l.id)));
    }
    entities.extend(book.discounts().iter().map(|d| EntityRef::Discount(d.id)));
    entities.extend(book.student_discounts().iter().map(|d| EntityRef::StudentDiscount(d.id)));
    entities.extend(book.payments().iter().map(|p| EntityRef::Payment(p.id)));
    entities.extend(book.allocations().iter().map(|a| EntityRef::Allocation(a.id)));
    entities
}

/// Number generator backed by in-memory counters
///
/// Produces `PREFIX-YEAR-NNNNNN`, e.g. `RCP-2026-000001`.
#[derive(Debug, Default)]
pub struct SequentialNumberGenerator {
    counters: Mutex<HashMap<(String, i32), u64>>,
}

impl SequentialNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainPort for SequentialNumberGenerator {}

#[async_trait]
impl NumberGenerator for SequentialNumberGenerator {
    async fn generate(&self, prefix: &str, year: i32) -> Result<String, PortError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry((prefix.to_string(), year)).or_insert(0);
        *counter += 1;
        Ok(format!("{}-{}-{:06}", prefix, year, counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceType;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryLedgerStore::new();
        let payer = PayerId::new();

        let mut session = store.begin(payer).await.unwrap();
        let invoice = session
            .book_mut()
            .create_invoice(InvoiceType::Term, "INV-1", None, None);
        session.commit().await.unwrap();

        let book = store.snapshot(payer).await.unwrap();
        assert_eq!(book.invoices().len(), 1);
        assert!(book.changes().is_empty());
        assert_eq!(store.resolve_payer(EntityRef::Invoice(invoice.id)).await.unwrap(), payer);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = InMemoryLedgerStore::new();
        let payer = PayerId::new();

        let mut session = store.begin(payer).await.unwrap();
        let invoice = session
            .book_mut()
            .create_invoice(InvoiceType::Term, "INV-1", None, None);
        session.rollback().await.unwrap();

        assert!(store.snapshot(payer).await.unwrap().invoices().is_empty());
        let missing = store.resolve_payer(EntityRef::Invoice(invoice.id)).await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sessions_for_one_payer_serialize() {
        let store = InMemoryLedgerStore::new();
        let payer = PayerId::new();

        let first = store.begin(payer).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin(payer)).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(50), store.begin(PayerId::new())).await;
        assert!(other.is_ok());

        drop(first);
        assert!(store.begin(payer).await.is_ok());
    }

    #[tokio::test]
    async fn test_sequential_numbers_per_prefix_and_year() {
        let generator = SequentialNumberGenerator::new();
        assert_eq!(generator.generate("RCP", 2026).await.unwrap(), "RCP-2026-000001");
        assert_eq!(generator.generate("RCP", 2026).await.unwrap(), "RCP-2026-000002");
        assert_eq!(generator.generate("RCP", 2027).await.unwrap(), "RCP-2027-000001");
        assert_eq!(generator.generate("INV", 2026).await.unwrap(), "INV-2026-000001");
    }

    #[tokio::test]
    async fn test_list_payers_sorted() {
        let a = PayerBook::new(PayerId::new());
        let b = PayerBook::new(PayerId::new());
        let store = InMemoryLedgerStore::with_books(vec![a.clone(), b.clone()]).await;

        let mut expected = vec![a.payer_id(), b.payer_id()];
        expected.sort();
        assert_eq!(store.list_payers().await.unwrap(), expected);
    }
}
