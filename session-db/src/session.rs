//! Request-scoped sessions and row-level-security identity tagging

use sqlx::{PgConnection, Postgres, pool::PoolConnection};
use uuid::Uuid;

/// Name of the session-local setting consumed by row-level-security policies.
///
/// Identity-scoped sessions always assign this setting before any caller
/// query runs, so policies can assume it carries a defined value.
pub const IDENTITY_SETTING: &str = "app.current_user_id";

/// Identity of the caller a session acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CallerIdentity(Uuid);

impl CallerIdentity {
    /// The nil-UUID sentinel applied when no caller identity is supplied.
    ///
    /// Policies match against this value rather than an unset setting.
    pub const ANONYMOUS: CallerIdentity = CallerIdentity(Uuid::nil());

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CallerIdentity {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short-lived session borrowed from the pool for one logical unit of work.
///
/// Dropping the session returns the underlying connection to the pool. This
/// is the release contract: it holds on normal return, on error propagation,
/// on panic unwind, and when the owning task is cancelled. A session must
/// never be shared across concurrent units of work.
#[derive(Debug)]
pub struct Session(PoolConnection<Postgres>);

impl Session {
    pub(crate) fn new(conn: PoolConnection<Postgres>) -> Self {
        Self(conn)
    }

    /// Applies the caller identity as a session-local setting.
    ///
    /// Must run before any caller query; a failure propagates unchanged and
    /// drops the session, releasing the connection.
    pub(crate) async fn apply_identity(
        &mut self,
        identity: &CallerIdentity,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(IDENTITY_SETTING)
            .bind(identity.to_string())
            .execute(&mut *self.0)
            .await?;
        Ok(())
    }
}

impl std::ops::Deref for Session {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
