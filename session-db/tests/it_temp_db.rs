//! DB integration tests for the temporary database helpers

use pgtemp::PgTempDB;
use session_db::{KEEP_TEMP_DIRS, PoolConfig, SessionDb, temp::TempSessionDb, temp_session_db};

#[tokio::test]
async fn temp_database_serves_sessions() {
    //* Given
    let db = TempSessionDb::new(false, PoolConfig::default()).await;

    //* When
    let mut session = db.session().await.expect("Failed to acquire a session");

    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(&mut *session)
        .await
        .expect("Failed to run a query through the session");

    //* Then
    assert_eq!(one, 1);
    assert!(db.health_check().await, "The temp database should be reachable");
}

#[tokio::test]
async fn shared_temp_database_is_reused_across_callers() {
    //* Given
    let first = temp_session_db(*KEEP_TEMP_DIRS, PoolConfig::default()).await;

    //* When
    let second = temp_session_db(*KEEP_TEMP_DIRS, PoolConfig::default()).await;

    //* Then
    assert_eq!(
        first.url(),
        second.url(),
        "Both callers should get the same shared instance"
    );
    assert!(second.health_check().await);
}

#[tokio::test]
async fn connect_with_retry_reaches_a_fresh_database() {
    //* Given
    let temp_db = PgTempDB::new();

    //* When
    let db = SessionDb::connect_with_retry(&temp_db.connection_uri(), PoolConfig::default())
        .await
        .expect("Failed to connect to session db");

    //* Then
    assert!(db.health_check().await);
}
