use std::sync::LazyLock;

use pgtemp::{PgTempDB, PgTempDBBuilder};
use tokio::sync::OnceCell;

use crate::{PoolConfig, SessionDb};

/// Whether to keep the temporary directory after the database is dropped
///
/// This is set to `false` by default, but can be overridden by the
/// `KEEP_TEMP_DIRS` environment variable.
pub static KEEP_TEMP_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("KEEP_TEMP_DIRS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});

/// Temporary session DB
///
/// This is a wrapper around [`SessionDb`] that creates a temporary database.
/// On drop, the database is deleted.
pub struct TempSessionDb {
    /// Inner session DB handle
    inner: SessionDb,

    /// Temporary database handle
    ///
    /// On drop, the database is deleted.
    _temp_db: PgTempDB,
}

impl TempSessionDb {
    /// Create a new temporary session DB
    pub async fn new(keep: bool, config: PoolConfig) -> Self {
        // Set C locale. To remove this `unsafe` we need:
        // https://github.com/boustrophedon/pgtemp/pull/21
        unsafe {
            std::env::set_var("LANG", "C");
        }

        let builder = PgTempDBBuilder::new().persist_data(keep);
        let pg_temp = PgTempDB::from_builder(builder);

        let data_dir = pg_temp.data_dir();
        tracing::info!("initializing temp session-db at: {}", data_dir.display());
        let uri = pg_temp.connection_uri();
        tracing::info!("connecting to session-db at: {}", uri);

        let session_db = SessionDb::connect_with_retry(&uri, config)
            .await
            .expect("failed to connect to session-db");

        TempSessionDb {
            inner: session_db,
            _temp_db: pg_temp,
        }
    }

    /// Get the URL of the temporary session DB
    pub fn url(&self) -> &str {
        self.inner.url()
    }
}

impl std::ops::Deref for TempSessionDb {
    type Target = SessionDb;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Temp session db for sharing among tests. It is shared with the reasoning
/// that this helps us catch more bugs, even if it is less deterministic.
static TEMP_SESSION_DB: OnceCell<TempSessionDb> = OnceCell::const_new();

/// Get the temporary session DB
///
/// This is a shared instance of the temporary session DB that can be used by
/// tests.
///
/// The `keep` parameter controls whether the temporary directory is kept
/// after the database is dropped.
pub async fn temp_session_db(keep: bool, config: PoolConfig) -> &'static TempSessionDb {
    TEMP_SESSION_DB
        .get_or_init(|| async { TempSessionDb::new(keep, config).await })
        .await
}
