use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use barkline_core::AppState;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkNotificationsReadRequest {
    pub sender_id: String,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Value>, ApiError> {
    let notifications =
        barkline_db::notifications::list_for_recipient(&state.db, auth.user_id, query.unread)
            .await?;

    let result: Vec<Value> = notifications
        .iter()
        .map(|n| {
            json!({
                "id": n.id.to_string(),
                "kind": n.kind,
                "sender_id": n.sender_id.to_string(),
                "recipient_id": n.recipient_id.to_string(),
                "message_id": n.message_id.to_string(),
                "read": n.read,
                "created_at": n.created_at.to_rfc3339(),
                "updated_at": n.updated_at.to_rfc3339(),
                "sender": {
                    "id": n.sender_id.to_string(),
                    "username": n.sender_username,
                    "display_name": n.sender_display_name,
                    "avatar_hash": n.sender_avatar_hash,
                }
            })
        })
        .collect();

    Ok(Json(json!(result)))
}

pub async fn mark_notifications_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<MarkNotificationsReadRequest>,
) -> Result<StatusCode, ApiError> {
    let sender_id: i64 = body
        .sender_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid sender_id".into()))?;

    barkline_db::notifications::mark_read_from_sender(&state.db, auth.user_id, sender_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
