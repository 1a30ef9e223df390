//! Billing domain errors

use core_kernel::{MoneyError, PortError};
use thiserror::Error;

/// Errors that can occur in the billing domain
///
/// Validation and not-found errors are business outcomes and are returned as
/// is. `InvalidState` means a ledger invariant would have been broken; the
/// surrounding transaction is abandoned instead of clamping the values.
#[derive(Debug, Error)]
pub enum BillingError {
    /// A business rule rejected the request
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// A ledger invariant would be violated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Money arithmetic failed
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    /// The ledger store failed
    #[error("Store error: {0}")]
    Store(PortError),
}

impl BillingError {
    /// Creates a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Creates a not found error for the given entity type and identifier
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        BillingError::InvalidState(message.into())
    }

    /// Returns true for business-rule rejections
    pub fn is_validation(&self) -> bool {
        matches!(self, BillingError::Validation(_))
    }

    /// Returns true when a referenced entity is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, BillingError::NotFound { .. })
    }

    /// Returns true when an invariant would have been broken
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, BillingError::InvalidState(_))
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => BillingError::NotFound {
                entity: entity_type,
                id,
            },
            other => BillingError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_maps_to_not_found() {
        let error: BillingError = PortError::not_found("Payment", "PAY-1").into();
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), "Payment not found: PAY-1");
    }

    #[test]
    fn test_other_port_errors_stay_store_errors() {
        let error: BillingError = PortError::connection("refused").into();
        assert!(matches!(error, BillingError::Store(ref e) if e.is_transient()));
    }

    #[test]
    fn test_predicates() {
        assert!(BillingError::validation("x").is_validation());
        assert!(BillingError::invalid_state("x").is_invalid_state());
        assert!(!BillingError::invalid_state("x").is_validation());
    }
}
