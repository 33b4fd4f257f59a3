use crate::{DbError, DbPool};
use barkline_models::notification::NotificationKind;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub kind: i16,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub message_id: i64,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationWithSenderRow {
    pub id: i64,
    pub kind: i16,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub message_id: i64,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sender_username: String,
    pub sender_display_name: Option<String>,
    pub sender_avatar_hash: Option<String>,
}

/// Conditional upsert backing the coalescing invariant: insert a fresh
/// unread notification, or — when the partial unique index finds an
/// existing unread row for this (sender, recipient) pair — bump its
/// timestamp and leave it unread. The original message reference is kept.
///
/// Returns the row and whether it was newly created (callers only push a
/// NOTIFICATION_CREATE event for new rows).
pub async fn upsert_message_notification(
    pool: &DbPool,
    id: i64,
    sender_id: i64,
    recipient_id: i64,
    message_id: i64,
    now: DateTime<Utc>,
) -> Result<(NotificationRow, bool), DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        "INSERT INTO notifications (id, kind, sender_id, recipient_id, message_id, read, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
         ON CONFLICT (sender_id, recipient_id) WHERE read = 0
         DO UPDATE SET updated_at = excluded.updated_at
         RETURNING id, kind, sender_id, recipient_id, message_id, read, created_at, updated_at",
    )
    .bind(id)
    .bind(NotificationKind::MessageReceived.as_i16())
    .bind(sender_id)
    .bind(recipient_id)
    .bind(message_id)
    .bind(now)
    .fetch_one(pool)
    .await?;

    let created = row.id == id;
    Ok((row, created))
}

pub async fn get_notification(
    pool: &DbPool,
    id: i64,
) -> Result<Option<NotificationRow>, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        "SELECT id, kind, sender_id, recipient_id, message_id, read, created_at, updated_at
         FROM notifications WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// The at-most-one unread row for a (sender, recipient) edge, if any.
pub async fn get_unread_for_pair(
    pool: &DbPool,
    sender_id: i64,
    recipient_id: i64,
) -> Result<Option<NotificationRow>, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        "SELECT id, kind, sender_id, recipient_id, message_id, read, created_at, updated_at
         FROM notifications
         WHERE sender_id = ?1 AND recipient_id = ?2 AND read = 0",
    )
    .bind(sender_id)
    .bind(recipient_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_for_recipient(
    pool: &DbPool,
    recipient_id: i64,
    unread_only: bool,
) -> Result<Vec<NotificationWithSenderRow>, DbError> {
    let query = if unread_only {
        "SELECT n.id, n.kind, n.sender_id, n.recipient_id, n.message_id, n.read, n.created_at, n.updated_at,
                u.username AS sender_username,
                u.display_name AS sender_display_name,
                u.avatar_hash AS sender_avatar_hash
         FROM notifications n
         INNER JOIN users u ON u.id = n.sender_id
         WHERE n.recipient_id = ?1 AND n.read = 0
         ORDER BY n.updated_at DESC"
    } else {
        "SELECT n.id, n.kind, n.sender_id, n.recipient_id, n.message_id, n.read, n.created_at, n.updated_at,
                u.username AS sender_username,
                u.display_name AS sender_display_name,
                u.avatar_hash AS sender_avatar_hash
         FROM notifications n
         INNER JOIN users u ON u.id = n.sender_id
         WHERE n.recipient_id = ?1
         ORDER BY n.updated_at DESC"
    };

    let rows = sqlx::query_as::<_, NotificationWithSenderRow>(query)
        .bind(recipient_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Mark every unread message notification on the (sender -> recipient)
/// edge as read. This is how opening a conversation clears its pending
/// notification. Returns the number of rows flipped.
pub async fn mark_read_from_sender(
    pool: &DbPool,
    recipient_id: i64,
    sender_id: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET read = 1, updated_at = ?3
         WHERE sender_id = ?1 AND recipient_id = ?2 AND read = 0",
    )
    .bind(sender_id)
    .bind(recipient_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
