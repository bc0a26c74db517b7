//! Connection and session lifecycle management for a PostgreSQL backend.
//!
//! One [`SessionDb`] is created per process at startup and injected into
//! request-handling code. It owns a bounded connection pool and hands out
//! short-lived [`Session`]s, optionally tagged with a [`CallerIdentity`] for
//! row-level-security enforcement at the storage layer.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

mod conn;
mod session;
pub mod settings;
#[cfg(feature = "temp-db")]
pub mod temp;

use self::conn::DbConnPool;
pub use self::{
    conn::{ConnError, DEFAULT_MAX_OVERFLOW, DEFAULT_POOL_SIZE, PoolConfig},
    session::{CallerIdentity, IDENTITY_SETTING, Session},
    settings::{ConnectionSettings, resolve_database_url},
};
#[cfg(feature = "temp-db")]
pub use self::temp::{KEEP_TEMP_DIRS, temp_session_db};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error connecting to database: {0}")]
    ConnectionError(sqlx::Error),

    #[error("Could not acquire a connection from the pool within the timeout")]
    AcquireTimeout(#[source] sqlx::Error),

    #[error("Error executing database query: {0}")]
    DbError(#[from] sqlx::Error),
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// The following errors are considered transient:
    /// - `Error::ConnectionError`: the initial connection to the database failed.
    /// - `Error::AcquireTimeout`: the pool timed out waiting for a free connection.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    /// - `sqlx::Error::PoolClosed`: the pool was closed while an operation was pending.
    ///
    /// Other database errors, such as constraint violations, are not
    /// considered transient.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::ConnectionError(_) | Error::AcquireTimeout(_) => true,
            Error::DbError(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
        }
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::ConnectionError(err),
        }
    }
}

/// Handle to the process-wide connection pool. Clones will refer to the same
/// pool.
#[derive(Clone, Debug)]
pub struct SessionDb {
    pool: DbConnPool,
    url: Arc<str>,
}

/// Lifecycle API
impl SessionDb {
    /// Sets up the connection pool, establishing an initial connection
    /// eagerly. Fails if the database is unreachable.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, config: PoolConfig) -> Result<Self, Error> {
        let pool = DbConnPool::connect(url, &config).await?;
        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// Sets up the connection pool without touching the database.
    ///
    /// Connections are established on first use. Pair with [`health_check`]
    /// at startup when the caller wants to decide how to handle an
    /// unreachable database instead of failing construction.
    ///
    /// [`health_check`]: SessionDb::health_check
    pub fn connect_lazy(url: &str, config: PoolConfig) -> Result<Self, Error> {
        let pool = DbConnPool::connect_lazy(url, &config)?;
        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// Sets up the connection pool with retry logic for temporary databases.
    #[cfg(feature = "temp-db")]
    #[instrument(skip_all, err)]
    pub async fn connect_with_retry(url: &str, config: PoolConfig) -> Result<Self, Error> {
        use backon::{ExponentialBuilder, Retryable};

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(std::time::Duration::from_millis(10))
            .with_max_delay(std::time::Duration::from_millis(100))
            .with_max_times(20);

        fn is_db_starting_up(err: &ConnError) -> bool {
            matches!(
                err,
                ConnError::ConnectionError(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code == "57P03")
            )
        }

        fn notify_retry(err: &ConnError, dur: std::time::Duration) {
            tracing::warn!(
                error = %err,
                "Database still starting up during connection. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        }

        let pool = (|| DbConnPool::connect(url, &config))
            .retry(retry_policy)
            .when(is_db_starting_up)
            .notify(notify_retry)
            .await?;

        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// The URL this pool connects with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The underlying pool, exposed for bookkeeping assertions
    /// (`size`/`num_idle`) and direct query execution.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Shutdown hook: drains the pool, closing all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Session API
impl SessionDb {
    async fn acquire(&self) -> Result<Session, Error> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(Session::new(conn)),
            Err(err @ sqlx::Error::PoolTimedOut) => Err(Error::AcquireTimeout(err)),
            Err(err) => Err(Error::DbError(err)),
        }
    }

    /// Borrows a session from the pool for one logical unit of work.
    ///
    /// Waits up to the configured acquire timeout, then fails with
    /// [`Error::AcquireTimeout`]. Dropping the returned session returns the
    /// connection to the pool on every exit path.
    pub async fn session(&self) -> Result<Session, Error> {
        self.acquire().await
    }

    /// Borrows a session and tags it with the caller identity for
    /// row-level-security enforcement.
    ///
    /// The identity is applied as the session-local setting
    /// [`IDENTITY_SETTING`] immediately after acquisition, before any caller
    /// query runs. Absent an identity, the nil-UUID sentinel
    /// [`CallerIdentity::ANONYMOUS`] is applied instead, so policies always
    /// have a defined value to match against. Not retried: a failure to apply
    /// the setting propagates and releases the connection.
    pub async fn identity_session(
        &self,
        identity: Option<CallerIdentity>,
    ) -> Result<Session, Error> {
        let mut session = self.acquire().await?;
        let identity = identity.unwrap_or(CallerIdentity::ANONYMOUS);
        session.apply_identity(&identity).await?;
        Ok(session)
    }
}

/// Health API
impl SessionDb {
    /// Round-trips a trivial query through the pool.
    ///
    /// Returns `true` on success. A failure is logged and converted to
    /// `false`; it never propagates past this boundary, leaving the decision
    /// of what to do with an unreachable database to the caller. Usable both
    /// as a startup reachability gate and from liveness/readiness probes.
    pub async fn health_check(&self) -> bool {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&*self.pool)
            .await
        {
            Ok(_) => {
                tracing::debug!("database health check succeeded");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "database health check failed");
                false
            }
        }
    }
}
