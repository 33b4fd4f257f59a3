use crate::{DbError, DbPool};
use barkline_models::conversation::ConversationKind;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: i64,
    pub kind: i16,
    pub pair_key: Option<String>,
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationWithPeerRow {
    pub id: i64,
    pub kind: i16,
    pub last_message_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
    pub peer_id: i64,
    pub peer_username: String,
    pub peer_display_name: Option<String>,
    pub peer_avatar_hash: Option<String>,
}

/// Normalized key for a two-party conversation; order-independent.
pub fn direct_pair_key(a: i64, b: i64) -> String {
    format!("{}:{}", a.min(b), a.max(b))
}

pub async fn find_direct_between(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT id, kind, pair_key, last_message_id, created_at, updated_at
         FROM conversations
         WHERE kind = 0 AND pair_key = ?1
         LIMIT 1",
    )
    .bind(direct_pair_key(user_a, user_b))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn create_direct(
    pool: &DbPool,
    conversation_id: i64,
    user_a: i64,
    user_b: i64,
) -> Result<ConversationRow, DbError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO conversations (id, kind, pair_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(conversation_id)
    .bind(ConversationKind::Direct as i16)
    .bind(direct_pair_key(user_a, user_b))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO conversation_members (conversation_id, user_id)
         VALUES (?1, ?2), (?1, ?3)",
    )
    .bind(conversation_id)
    .bind(user_a)
    .bind(user_b)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT id, kind, pair_key, last_message_id, created_at, updated_at
         FROM conversations
         WHERE id = ?1",
    )
    .bind(conversation_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_conversation(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT id, kind, pair_key, last_message_id, created_at, updated_at
         FROM conversations WHERE id = ?1",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_user_conversations(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<ConversationWithPeerRow>, DbError> {
    let rows = sqlx::query_as::<_, ConversationWithPeerRow>(
        "SELECT c.id, c.kind, c.last_message_id, c.updated_at,
                u.id AS peer_id,
                u.username AS peer_username,
                u.display_name AS peer_display_name,
                u.avatar_hash AS peer_avatar_hash
         FROM conversations c
         INNER JOIN conversation_members me ON me.conversation_id = c.id
         INNER JOIN conversation_members other ON other.conversation_id = c.id AND other.user_id != me.user_id
         INNER JOIN users u ON u.id = other.user_id
         WHERE c.kind = 0 AND me.user_id = ?1
         ORDER BY CASE WHEN c.last_message_id IS NULL THEN 1 ELSE 0 END, c.last_message_id DESC, c.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn get_member_ids(pool: &DbPool, conversation_id: i64) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM conversation_members WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_member(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let exists: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2 LIMIT 1",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}
