//! Billing Ledger - Balance Reconciliation
//!
//! Recomputes every payer's available credit from completed payments minus
//! credit allocations and repairs the cached value where it has drifted.
//!
//! # Usage
//!
//! ```bash
//! # Repair every payer
//! cargo run --bin reconcile-balances
//!
//! # Report drift without writing anything
//! cargo run --bin reconcile-balances -- --dry-run
//! ```
//!
//! # Environment Variables
//!
//! * `DATABASE_URL` - PostgreSQL connection string
//! * `DATABASE_MAX_CONNECTIONS` - Pool size (default: 10)
//! * `BILLING_RECEIPT_PREFIX`, `BILLING_INVOICE_PREFIX` - Number prefixes
//! * `LOG_LEVEL` - Used when `RUST_LOG` is unset (default: info)

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::{OperationMetadata, PayerId};
use domain_billing::{
    BillingConfig, BillingService, LedgerSession, LedgerStore, Reconciliation, TracingAuditSink,
};
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresLedgerStore, PostgresNumberGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&log_level);

    let dry_run = std::env::args().skip(1).any(|arg| arg == "--dry-run");

    let db_config = DatabaseConfig::from_env().context("loading database configuration")?;
    let billing_config = BillingConfig::from_env().context("loading billing configuration")?;

    let pool = create_pool(db_config).await.context("connecting to database")?;
    run_migrations(&pool).await.context("applying migrations")?;

    let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let service = BillingService::new(
        store.clone(),
        Arc::new(PostgresNumberGenerator::new(pool)),
        Arc::new(TracingAuditSink),
        billing_config,
    );
    let metadata = OperationMetadata::initiated_by("reconcile-balances");

    let payers = store.list_payers().await.context("listing payers")?;
    tracing::info!(payers = payers.len(), dry_run, "Reconciling payer balances");

    let mut drifted: Vec<Reconciliation> = Vec::new();
    for payer_id in payers {
        let result = if dry_run {
            inspect(store.as_ref(), payer_id).await?
        } else {
            service
                .reconcile(payer_id, &metadata)
                .await
                .with_context(|| format!("reconciling {}", payer_id))?
        };

        if result.has_drift() {
            drifted.push(result);
        }
    }

    let total_drift: Decimal = drifted.iter().map(|r| r.drift).sum();
    for result in &drifted {
        println!(
            "{}\tcached={}\trecomputed={}\tdrift={}",
            result.payer_id, result.cached, result.recomputed, result.drift
        );
    }
    println!(
        "{} payer(s) drifted, net drift {}{}",
        drifted.len(),
        total_drift,
        if dry_run { " (dry run, nothing written)" } else { "" }
    );

    Ok(())
}

/// Reconciles inside a session that is always rolled back
async fn inspect(store: &PostgresLedgerStore, payer_id: PayerId) -> anyhow::Result<Reconciliation> {
    let mut session = store
        .begin(payer_id)
        .await
        .with_context(|| format!("opening session for {}", payer_id))?;
    let result = session.book_mut().reconcile();
    session.rollback().await?;
    Ok(result)
}

/// Initializes the tracing subscriber for structured logging.
///
/// # Arguments
///
/// * `log_level` - The minimum log level to output (trace, debug, info, warn, error)
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
