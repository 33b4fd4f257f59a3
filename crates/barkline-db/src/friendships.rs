use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};

pub const STATE_ACCEPTED: i16 = 1;
pub const STATE_PENDING: i16 = 4;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FriendshipRow {
    pub user_id: i64,
    pub friend_id: i64,
    pub state: i16,
    pub created_at: DateTime<Utc>,
}

pub async fn upsert_friendship(
    pool: &DbPool,
    user_id: i64,
    friend_id: i64,
    state: i16,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO friendships (user_id, friend_id, state, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (user_id, friend_id) DO UPDATE SET state = ?3",
    )
    .bind(user_id)
    .bind(friend_id)
    .bind(state)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a single friendship row (directional).
pub async fn get_friendship(
    pool: &DbPool,
    user_id: i64,
    friend_id: i64,
) -> Result<Option<FriendshipRow>, DbError> {
    let row = sqlx::query_as::<_, FriendshipRow>(
        "SELECT user_id, friend_id, state, created_at
         FROM friendships
         WHERE user_id = ?1 AND friend_id = ?2",
    )
    .bind(user_id)
    .bind(friend_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Mutual friendship requires accepted rows in both directions.
pub async fn are_mutual_friends(pool: &DbPool, a: i64, b: i64) -> Result<bool, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM friendships
         WHERE state = ?3
           AND ((user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))",
    )
    .bind(a)
    .bind(b)
    .bind(STATE_ACCEPTED)
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}

pub async fn delete_friendship(pool: &DbPool, user_id: i64, friend_id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM friendships WHERE user_id = ?1 AND friend_id = ?2")
        .bind(user_id)
        .bind(friend_id)
        .execute(pool)
        .await?;
    Ok(())
}
