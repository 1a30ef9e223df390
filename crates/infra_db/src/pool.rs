//! Database connection pool management
//!
//! Pool configuration for the PostgreSQL ledger store, loaded from the
//! environment, plus the embedded schema migrations.

use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use core_kernel::CoreError;

use crate::error::DatabaseError;

/// Type alias for the PostgreSQL connection pool
pub type DatabasePool = PgPool;

/// Pool settings for the ledger store
///
/// Every open ledger session pins one connection until it commits or rolls
/// back, so `max_connections` bounds how many payers can be worked on at once.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use infra_db::DatabaseConfig;
///
/// let config = DatabaseConfig::new("postgres://localhost/billing")
///     .max_connections(20)
///     .lock_timeout(Some(Duration::from_secs(5)));
/// assert_eq!(config.max_connections, 20);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long to wait for a free pooled connection
    pub connect_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    /// Upper bound on waiting for another session's payer lock
    ///
    /// `None` waits indefinitely. Expiry surfaces as a transient port error.
    pub lock_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Creates a configuration for `url` with pool defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            lock_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

const DEFAULT_URL: &str = "postgres://localhost/billing";

/// Environment shape for [`DatabaseConfig::from_env`]; durations in seconds
#[derive(Debug, Deserialize)]
struct RawDatabaseConfig {
    url: String,
    max_connections: u32,
    min_connections: u32,
    connect_timeout_secs: u64,
    max_lifetime_secs: u64,
    idle_timeout_secs: u64,
    /// Zero disables the lock timeout
    lock_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Loads configuration from `DATABASE_*` environment variables
    ///
    /// Recognised: `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_CONNECT_TIMEOUT_SECS`,
    /// `DATABASE_MAX_LIFETIME_SECS`, `DATABASE_IDLE_TIMEOUT_SECS`,
    /// `DATABASE_LOCK_TIMEOUT_SECS` (0 waits forever). Anything unset keeps
    /// the value from [`DatabaseConfig::default`].
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let raw: RawDatabaseConfig = config::Config::builder()
            .set_default("url", defaults.url.clone())
            .and_then(|b| b.set_default("max_connections", i64::from(defaults.max_connections)))
            .and_then(|b| b.set_default("min_connections", i64::from(defaults.min_connections)))
            .and_then(|b| b.set_default("connect_timeout_secs", secs(defaults.connect_timeout)))
            .and_then(|b| b.set_default("max_lifetime_secs", secs(defaults.max_lifetime)))
            .and_then(|b| b.set_default("idle_timeout_secs", secs(defaults.idle_timeout)))
            .and_then(|b| {
                b.set_default("lock_timeout_secs", defaults.lock_timeout.map(secs).unwrap_or(0))
            })
            .map_err(|e| CoreError::configuration(e.to_string()))?
            .add_source(config::Environment::with_prefix("DATABASE").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::configuration(e.to_string()))?;

        Ok(Self::new(raw.url)
            .max_connections(raw.max_connections)
            .min_connections(raw.min_connections)
            .connect_timeout(Duration::from_secs(raw.connect_timeout_secs))
            .max_lifetime(Duration::from_secs(raw.max_lifetime_secs))
            .idle_timeout(Duration::from_secs(raw.idle_timeout_secs))
            .lock_timeout(match raw.lock_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            }))
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Opens the connection pool
///
/// When a lock timeout is configured, each new connection runs
/// `SET lock_timeout` so a session blocked on a payer lock eventually fails
/// instead of hanging.
///
/// # Errors
///
/// Returns `DatabaseError::ConnectionFailed` if the first connections cannot
/// be established.
///
/// # Example
///
/// ```rust,ignore
/// use infra_db::{DatabaseConfig, create_pool};
///
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
/// ```
pub async fn create_pool(config: DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        lock_timeout_ms = config.lock_timeout.map(|t| t.as_millis() as u64),
        "Creating database pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout);

    if let Some(timeout) = config.lock_timeout {
        let millis = timeout.as_millis();
        options = options.after_connect(move |conn, _meta| {
            Box::pin(async move {
                let statement = format!("SET lock_timeout = '{}ms'", millis);
                sqlx::query(&statement).execute(&mut *conn).await?;
                Ok(())
            })
        });
    }

    let pool = options
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    info!("Database pool created");
    Ok(pool)
}

/// Opens a pool for `url` with default settings
pub async fn create_pool_from_url(url: &str) -> Result<DatabasePool, DatabaseError> {
    create_pool(DatabaseConfig::new(url)).await
}

/// Applies the ledger schema migrations embedded from `migrations/`
pub async fn run_migrations(pool: &DatabasePool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

    info!("Ledger schema is up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::new("postgres://test")
            .max_connections(50)
            .min_connections(10)
            .connect_timeout(Duration::from_secs(60));

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.min_connections, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_default_points_at_billing_database() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "postgres://localhost/billing");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_lock_timeout_can_be_disabled() {
        let config = DatabaseConfig::default().lock_timeout(None);
        assert!(config.lock_timeout.is_none());
        assert_eq!(DatabaseConfig::default().lock_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_env_keeps_defaults_for_unset_values() {
        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }
}
