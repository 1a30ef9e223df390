//! Adapters for the billing ports that need no external system
//!
//! - [`InMemoryLedgerStore`]: a per-payer locked store for tests and tooling
//! - [`SequentialNumberGenerator`]: counter-backed document numbers
//! - [`RecordingAuditSink`]: keeps entries in memory for inspection
//! - [`TracingAuditSink`]: writes entries as structured log events

pub mod memory;
pub mod audit;

pub use memory::{InMemoryLedgerStore, InMemorySession, SequentialNumberGenerator};
pub use audit::{RecordingAuditSink, TracingAuditSink};
