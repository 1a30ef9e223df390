//! Audit sinks

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use core_kernel::{DomainPort, PortError};

use crate::ports::{AuditEntry, AuditSink};

/// Keeps audit entries in memory
///
/// `failing()` builds a sink that rejects every entry, for checking that
/// audit failures never undo a committed change.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
    fail: bool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            fail: true,
        }
    }

    /// Entries recorded so far, oldest first
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    /// Actions recorded so far, oldest first
    pub async fn actions(&self) -> Vec<String> {
        self.entries.read().await.iter().map(|e| e.action.clone()).collect()
    }
}

impl DomainPort for RecordingAuditSink {}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<(), PortError> {
        if self.fail {
            return Err(PortError::connection("audit sink unavailable"));
        }
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// Writes audit entries as `tracing` events under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl DomainPort for TracingAuditSink {}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<(), PortError> {
        let old_values = entry.old_values.map(|v| v.to_string());
        let new_values = entry.new_values.map(|v| v.to_string());

        info!(
            target: "audit",
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            user_id = entry.user_id.as_deref().unwrap_or("system"),
            correlation_id = entry.correlation_id.as_deref(),
            old_values = old_values.as_deref(),
            new_values = new_values.as_deref(),
            "audit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingAuditSink::new();
        sink.log(AuditEntry::new("a", "Invoice", "1")).await.unwrap();
        sink.log(AuditEntry::new("b", "Invoice", "1")).await.unwrap();
        assert_eq!(sink.actions().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_sink_rejects() {
        let sink = RecordingAuditSink::failing();
        let result = sink.log(AuditEntry::new("a", "Invoice", "1")).await;
        assert!(result.unwrap_err().is_transient());
        assert!(sink.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_entries() {
        let entry = AuditEntry::new("invoice.issued", "Invoice", "INV-1")
            .with_new_values(serde_json::json!({ "status": "issued" }));
        assert!(TracingAuditSink.log(entry).await.is_ok());
    }
}
