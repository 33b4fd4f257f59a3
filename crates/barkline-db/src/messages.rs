use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert a message and advance the owning conversation's last-message
/// pointer in one transaction, so a failure on either side leaves no
/// partially-updated conversation.
pub async fn create_message(
    pool: &DbPool,
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    recipient_id: i64,
    content: &str,
    created_at: DateTime<Utc>,
) -> Result<MessageRow, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
         RETURNING id, conversation_id, sender_id, recipient_id, content, read, created_at",
    )
    .bind(id)
    .bind(conversation_id)
    .bind(sender_id)
    .bind(recipient_id)
    .bind(content)
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE conversations SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(row.id)
        .bind(created_at)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_id, sender_id, recipient_id, content, read, created_at
         FROM messages WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_conversation_messages(
    pool: &DbPool,
    conversation_id: i64,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = match before {
        Some(before_id) => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, recipient_id, content, read, created_at
                 FROM messages WHERE conversation_id = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3",
            )
            .bind(conversation_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, recipient_id, content, read, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .bind(conversation_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Flip the read flag on the given messages, guarded so only the
/// recipient can flip them and the transition is unread -> read only.
/// Returns the number of messages actually flipped.
pub async fn mark_read(pool: &DbPool, recipient_id: i64, ids: &[i64]) -> Result<u64, DbError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut flipped = 0;
    for &id in ids {
        let result =
            sqlx::query("UPDATE messages SET read = 1 WHERE id = ?1 AND recipient_id = ?2 AND read = 0")
                .bind(id)
                .bind(recipient_id)
                .execute(&mut *tx)
                .await?;
        flipped += result.rows_affected();
    }
    tx.commit().await?;

    Ok(flipped)
}
