//! Ports and Adapters Infrastructure
//!
//! Shared building blocks for the ports the billing domain exposes to its
//! collaborators (the ledger store, the number generator, the audit sink).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BillingService                            │
//! │   (opens a session, runs the engines, commits, audits)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Port Traits                             │
//! │   LedgerStore, NumberGenerator, AuditSink (domain_billing)   │
//! └─────────────────────────────────────────────────────────────┘
//!                    ▲                         ▲
//!                    │                         │
//!         ┌─────────┴─────────┐     ┌────────┴────────┐
//!         │  Postgres adapter │     │ In-memory adapter│
//!         │     (infra_db)    │     │ (tests, tooling) │
//!         └───────────────────┘     └──────────────────┘
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// Failure reported by a ledger store, number generator, or audit sink
///
/// Adapters translate their own errors into this type, so the domain sees
/// the same error whether a session is backed by Postgres or by memory.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The store rejected data the domain considered valid
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A uniqueness or referential rule was violated
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Waiting for a payer lock or a pooled connection took too long
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection { message: message.into(), source: None }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal { message: message.into(), source: None }
    }

    /// Attaches the underlying cause to a `Connection` or `Internal` error
    ///
    /// Other variants are returned unchanged.
    pub fn with_source(self, cause: impl StdError + Send + Sync + 'static) -> Self {
        match self {
            PortError::Connection { message, .. } => PortError::Connection {
                message,
                source: Some(Box::new(cause)),
            },
            PortError::Internal { message, .. } => PortError::Internal {
                message,
                source: Some(Box::new(cause)),
            },
            other => other,
        }
    }

    /// Whether restarting the whole ledger transaction might succeed
    ///
    /// Nothing in the ledger retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. } | PortError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// Marker for everything the domain reaches through a port
///
/// Ports live behind `Arc` and are shared between tasks.
pub trait DomainPort: Send + Sync + 'static {}

/// Coarse health of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    /// Serving requests, but slowly or partially
    Degraded,
    Unhealthy,
}

/// Outcome of one health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub adapter_id: String,
    pub status: AdapterHealth,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(adapter_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Healthy,
            latency_ms,
            message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(adapter_id: impl Into<String>, latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Unhealthy,
            latency_ms,
            message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Adapters that can probe their backing system
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}

/// Who asked for a ledger operation, and under which request
///
/// Copied into every audit entry the operation produces.
#[derive(Debug, Clone, Default)]
pub struct OperationMetadata {
    pub correlation_id: Option<String>,
    /// Bursar, clerk, or job name
    pub initiated_by: Option<String>,
    pub context: HashMap<String, String>,
}

impl OperationMetadata {
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Default::default()
        }
    }

    pub fn initiated_by(user_id: impl Into<String>) -> Self {
        Self {
            initiated_by: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}
