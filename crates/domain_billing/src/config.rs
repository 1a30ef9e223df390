//! Billing configuration

use serde::Deserialize;

use core_kernel::CoreError;

/// Ledger settings
///
/// Loaded from `BILLING_*` environment variables, e.g.
/// `BILLING_DEFAULT_DUE_DAYS=14`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BillingConfig {
    /// Payment term applied when an invoice is issued without a due date
    pub default_due_days: u32,
    /// Prefix for receipt numbers
    pub receipt_prefix: String,
    /// Prefix for invoice numbers
    pub invoice_prefix: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_due_days: 30,
            receipt_prefix: "RCP".to_string(),
            invoice_prefix: "INV".to_string(),
        }
    }
}

impl BillingConfig {
    /// Loads configuration from environment, falling back to defaults
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        config::Config::builder()
            .set_default("default_due_days", i64::from(defaults.default_due_days))
            .and_then(|b| b.set_default("receipt_prefix", defaults.receipt_prefix))
            .and_then(|b| b.set_default("invoice_prefix", defaults.invoice_prefix))
            .map_err(|e| CoreError::configuration(e.to_string()))?
            .add_source(config::Environment::with_prefix("BILLING").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::configuration(e.to_string()))
    }

    /// Sets the default payment term
    pub fn with_default_due_days(mut self, days: u32) -> Self {
        self.default_due_days = days;
        self
    }

    /// Sets the receipt prefix
    pub fn with_receipt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.receipt_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.default_due_days, 30);
        assert_eq!(config.receipt_prefix, "RCP");
        assert_eq!(config.invoice_prefix, "INV");
    }

    #[test]
    fn test_from_env_without_overrides_uses_defaults() {
        // Nothing in the test environment sets BILLING_*
        let config = BillingConfig::from_env().unwrap();
        assert_eq!(config, BillingConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = BillingConfig::default()
            .with_default_due_days(14)
            .with_receipt_prefix("REC");
        assert_eq!(config.default_due_days, 14);
        assert_eq!(config.receipt_prefix, "REC");
    }
}
