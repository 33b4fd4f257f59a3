pub mod conversations;
pub mod friendships;
pub mod messages;
pub mod notifications;
pub mod users;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub type DbPool = sqlx::SqlitePool;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations: applied successfully");
    Ok(())
}

/// True when an insert failed because a unique index rejected it.
/// SQLite reports 2067 (UNIQUE) or 1555 (primary key) as extended codes.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };

    let code_binding = db_err.code();
    let code = code_binding.as_deref().unwrap_or_default();
    if code == "2067" || code == "1555" {
        return true;
    }

    db_err
        .message()
        .to_ascii_lowercase()
        .contains("unique constraint failed")
}

#[cfg(test)]
mod tests {
    use super::{create_pool, is_unique_violation, run_migrations};
    use chrono::Utc;

    async fn test_pool() -> super::DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn create_pool_supports_in_memory_sqlite() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        let value: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query");
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn pair_key_index_rejects_duplicate_direct_conversations() {
        let pool = test_pool().await;
        crate::users::create_user(&pool, 1, "rex_owner", None)
            .await
            .expect("user a");
        crate::users::create_user(&pool, 2, "luna_owner", None)
            .await
            .expect("user b");

        crate::conversations::create_direct(&pool, 10, 1, 2)
            .await
            .expect("first create");
        let err = crate::conversations::create_direct(&pool, 11, 2, 1)
            .await
            .expect_err("duplicate pair must be rejected");
        match err {
            super::DbError::Sqlx(e) => assert!(is_unique_violation(&e)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn notification_upsert_coalesces_unread_rows() {
        let pool = test_pool().await;
        crate::users::create_user(&pool, 1, "rex_owner", None)
            .await
            .expect("user a");
        crate::users::create_user(&pool, 2, "luna_owner", None)
            .await
            .expect("user b");
        let conv = crate::conversations::create_direct(&pool, 10, 1, 2)
            .await
            .expect("conversation");
        let first = crate::messages::create_message(&pool, 100, conv.id, 1, 2, "hi", Utc::now())
            .await
            .expect("first message");
        let second = crate::messages::create_message(&pool, 101, conv.id, 1, 2, "there", Utc::now())
            .await
            .expect("second message");

        let (n1, created1) =
            crate::notifications::upsert_message_notification(&pool, 200, 1, 2, first.id, first.created_at)
                .await
                .expect("first upsert");
        assert!(created1);

        let (n2, created2) =
            crate::notifications::upsert_message_notification(&pool, 201, 1, 2, second.id, second.created_at)
                .await
                .expect("second upsert");
        assert!(!created2);
        assert_eq!(n2.id, n1.id);
        assert!(!n2.read);
        assert!(n2.updated_at >= n1.updated_at);

        let unread = crate::notifications::list_for_recipient(&pool, 2, true)
            .await
            .expect("list");
        assert_eq!(unread.len(), 1);
    }

    #[tokio::test]
    async fn message_read_flag_is_monotonic() {
        let pool = test_pool().await;
        crate::users::create_user(&pool, 1, "rex_owner", None)
            .await
            .expect("user a");
        crate::users::create_user(&pool, 2, "luna_owner", None)
            .await
            .expect("user b");
        let conv = crate::conversations::create_direct(&pool, 10, 1, 2)
            .await
            .expect("conversation");
        let msg = crate::messages::create_message(&pool, 100, conv.id, 1, 2, "hi", Utc::now())
            .await
            .expect("message");
        assert!(!msg.read);

        let flipped = crate::messages::mark_read(&pool, 2, &[msg.id]).await.expect("mark");
        assert_eq!(flipped, 1);

        // Second pass is a no-op; the flag stays set.
        let flipped_again = crate::messages::mark_read(&pool, 2, &[msg.id])
            .await
            .expect("mark again");
        assert_eq!(flipped_again, 0);
        let row = crate::messages::get_message(&pool, msg.id)
            .await
            .expect("get")
            .expect("exists");
        assert!(row.read);
    }
}
