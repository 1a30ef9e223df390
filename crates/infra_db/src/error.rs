//! Database error types
//!
//! Errors raised while loading or persisting payer books, and how each one
//! surfaces through the store port.

use thiserror::Error;

use core_kernel::PortError;

/// Failure of a ledger query, transaction, or migration
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// No connection became free within the acquire timeout
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Unique index rejected the row (23505), e.g. a reused receipt number
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Row points at a payer or invoice that does not exist (23503)
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A derived-amount or status CHECK failed (23514)
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Deadlock or lock wait abort (40P01, 55P03) while taking payer locks
    #[error("Lock contention: {0}")]
    LockContention(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Creates a not found error for a ledger entity
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("Invoice", "INV-2026-000123");
    /// assert!(error.to_string().contains("INV-2026-000123"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{} with id '{}' not found", entity, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry(_)
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
        )
    }

    /// Whether the whole transaction may succeed if started again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed(_)
                | DatabaseError::PoolExhausted
                | DatabaseError::LockContention(_)
        )
    }
}

/// Classifies a sqlx error by PostgreSQL SQLSTATE
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>.
impl From<&sqlx::Error> for DatabaseError {
    fn from(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseError::ConnectionFailed(error.to_string())
            }
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry(message),
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") => DatabaseError::ConstraintViolation(message),
                    Some("40P01") | Some("55P03") => DatabaseError::LockContention(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}

/// Translates database failures into port errors
///
/// Constraint violations become conflicts: the ledger validates before
/// writing, so a rejected row means the stored data disagrees with the book.
impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        let error = match error {
            DatabaseError::SqlError(ref inner) => DatabaseError::from(inner),
            other => other,
        };
        let message = error.to_string();

        match error {
            DatabaseError::NotFound(detail) => PortError::not_found("Record", detail),
            DatabaseError::DuplicateEntry(_)
            | DatabaseError::ForeignKeyViolation(_)
            | DatabaseError::ConstraintViolation(_) => PortError::conflict(message),
            DatabaseError::LockContention(_) => PortError::Timeout {
                operation: message,
                duration_ms: 0,
            },
            DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted => {
                PortError::connection(message).with_source(error)
            }
            other => PortError::internal(message).with_source(other),
        }
    }
}

/// Shorthand for mapping a raw sqlx error straight to a port error
pub(crate) fn port_error(error: sqlx::Error) -> PortError {
    PortError::from(DatabaseError::from(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violations_become_conflicts() {
        let error: PortError = DatabaseError::ConstraintViolation("paid_amount".into()).into();
        assert!(matches!(error, PortError::Conflict { .. }));
    }

    #[test]
    fn test_pool_exhaustion_is_transient() {
        let error: PortError = DatabaseError::PoolExhausted.into();
        assert!(error.is_transient());
    }

    #[test]
    fn test_lock_contention_is_transient() {
        let error: PortError = DatabaseError::LockContention("deadlock detected".into()).into();
        assert!(matches!(error, PortError::Timeout { .. }));
        assert!(error.is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let error = port_error(sqlx::Error::RowNotFound);
        assert!(error.is_not_found());
    }

    #[test]
    fn test_closed_pool_is_a_connection_failure() {
        let error = DatabaseError::from(&sqlx::Error::PoolClosed);
        assert!(matches!(error, DatabaseError::ConnectionFailed(_)));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_helpers() {
        assert!(DatabaseError::not_found("Payment", "PAY-1").is_not_found());
        assert!(DatabaseError::DuplicateEntry("receipt_number".into()).is_constraint_violation());
        assert!(!DatabaseError::MigrationFailed("checksum".into()).is_retryable());
    }
}
