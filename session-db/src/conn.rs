//! Internal connection pool implementation

use std::time::Duration;

use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tracing::instrument;

/// Errors that can occur when setting up the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Error connecting to the database.
    #[error("Error connecting to database: {0}")]
    ConnectionError(#[source] sqlx::Error),
}

/// Pool sizing and lifecycle settings, fixed at construction.
///
/// The defaults are tuned for a backend serving on the order of 200+
/// concurrent logical callers spread across multiple processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections kept open at all times.
    pub base_size: u32,

    /// Temporary connections allowed above `base_size` under load.
    pub max_overflow: u32,

    /// How long a caller waits for a free connection before failing.
    pub acquire_timeout: Duration,

    /// A pooled connection older than this is discarded and re-established
    /// on next use.
    pub recycle_interval: Duration,

    /// Run a liveness probe before lending out a pooled connection, so dead
    /// connections are replaced transparently.
    pub pre_ping: bool,
}

/// Default base pool size.
pub const DEFAULT_POOL_SIZE: u32 = 20;

/// Default overflow above the base pool size.
pub const DEFAULT_MAX_OVERFLOW: u32 = 30;

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            acquire_timeout: Duration::from_secs(30),
            recycle_interval: Duration::from_secs(1800),
            pre_ping: true,
        }
    }
}

impl PoolConfig {
    /// Hard cap on concurrent connections: `base_size + max_overflow`.
    pub fn max_size(&self) -> u32 {
        self.base_size + self.max_overflow
    }
}

/// A pooled connection source. Clones will refer to the same pool.
#[derive(Debug, Clone)]
pub struct DbConnPool(Pool<Postgres>);

impl DbConnPool {
    /// Sets up a connection pool, establishing an initial connection eagerly.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, ConnError> {
        Self::options(config)
            .connect(url)
            .await
            .map(Self)
            .map_err(ConnError::ConnectionError)
    }

    /// Sets up a connection pool without touching the database.
    ///
    /// Connections are established on first acquisition. Fails only on a
    /// malformed URL.
    pub fn connect_lazy(url: &str, config: &PoolConfig) -> Result<Self, ConnError> {
        Self::options(config)
            .connect_lazy(url)
            .map(Self)
            .map_err(ConnError::ConnectionError)
    }

    fn options(config: &PoolConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(config.base_size)
            .max_connections(config.max_size())
            .acquire_timeout(config.acquire_timeout)
            .max_lifetime(config.recycle_interval)
            .test_before_acquire(config.pre_ping)
    }
}

impl std::ops::Deref for DbConnPool {
    type Target = Pool<Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for DbConnPool {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
