//! DB integration tests for the scoped session release contract

use std::time::{Duration, Instant};

use pgtemp::PgTempDB;
use session_db::{CallerIdentity, Error, IDENTITY_SETTING, PoolConfig, SessionDb};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

/// A small pool so the bookkeeping assertions stay exact.
fn small_pool() -> PoolConfig {
    PoolConfig {
        base_size: 1,
        max_overflow: 1,
        acquire_timeout: Duration::from_millis(500),
        ..PoolConfig::default()
    }
}

/// Waits until every pool connection is back to idle (or closed).
///
/// Returning a connection to the pool on drop completes asynchronously, so
/// the in-use count is polled rather than asserted immediately.
async fn wait_until_released(pool: &Pool<Postgres>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let in_use = (pool.size() as usize).saturating_sub(pool.num_idle());
        if in_use == 0 {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "connections still in use after 5s: {in_use}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn session_released_on_normal_return() {
    //* Given
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    //* When
    {
        let mut session = db.session().await.expect("Failed to acquire a session");
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut *session)
            .await
            .expect("Failed to run a query through the session");
        assert_eq!(one, 1);
    }

    //* Then
    wait_until_released(db.pool()).await;
}

#[tokio::test]
async fn session_released_when_caller_errors() {
    //* Given
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    async fn failing_unit_of_work(db: &SessionDb) -> Result<(), Error> {
        let mut session = db.session().await?;
        sqlx::query("SELECT * FROM table_that_does_not_exist")
            .execute(&mut *session)
            .await?;
        Ok(())
    }

    //* When
    let result = failing_unit_of_work(&db).await;

    //* Then
    assert!(result.is_err(), "The unit of work should have failed");
    wait_until_released(db.pool()).await;
}

#[tokio::test]
async fn session_released_when_task_is_cancelled() {
    //* Given
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    //* When
    let task = tokio::spawn({
        let db = db.clone();
        async move {
            let mut session = db.session().await.expect("Failed to acquire a session");
            sqlx::query("SELECT pg_sleep(30)")
                .execute(&mut *session)
                .await
                .expect("The sleep should have been cancelled");
        }
    });

    // Give the task time to acquire and start the query, then cancel it
    tokio::time::sleep(Duration::from_millis(200)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    //* Then
    wait_until_released(db.pool()).await;
}

#[tokio::test]
async fn oversubscription_fails_with_timeout() {
    //* Given
    // Capacity of 2: base size 1 plus 1 overflow
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    //* When
    let _first = db.session().await.expect("First acquisition should succeed");
    let _second = db
        .session()
        .await
        .expect("Second acquisition should succeed");

    let third = db.session().await;

    //* Then
    let err = third.expect_err("Third acquisition should have timed out");
    assert!(
        matches!(err, Error::AcquireTimeout(_)),
        "Expected AcquireTimeout, got: {err}"
    );
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn identity_session_applies_caller_identity() {
    //* Given
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    let caller = Uuid::new_v4();

    //* When
    let mut session = db
        .identity_session(Some(CallerIdentity::new(caller)))
        .await
        .expect("Failed to acquire an identity session");

    let setting: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
        .bind(IDENTITY_SETTING)
        .fetch_one(&mut *session)
        .await
        .expect("Failed to read the identity setting");

    //* Then
    assert_eq!(setting.as_deref(), Some(caller.to_string().as_str()));
}

#[tokio::test]
async fn identity_session_without_identity_applies_nil_sentinel() {
    //* Given
    let temp_db = PgTempDB::new();

    let db = SessionDb::connect(&temp_db.connection_uri(), small_pool())
        .await
        .expect("Failed to connect to session db");

    //* When
    let mut session = db
        .identity_session(None)
        .await
        .expect("Failed to acquire an identity session");

    let setting: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
        .bind(IDENTITY_SETTING)
        .fetch_one(&mut *session)
        .await
        .expect("Failed to read the identity setting");

    //* Then
    assert_eq!(
        setting.as_deref(),
        Some(Uuid::nil().to_string().as_str()),
        "The setting should carry the nil-UUID sentinel, never be unset"
    );
}
