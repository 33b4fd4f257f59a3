use axum::{extract::State, http::StatusCode, Json};
use barkline_core::AppState;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub peer_id: String,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let conversations =
        barkline_db::conversations::list_user_conversations(&state.db, auth.user_id).await?;

    let result: Vec<Value> = conversations
        .iter()
        .map(|c| {
            json!({
                "id": c.id.to_string(),
                "kind": c.kind,
                "last_message_id": c.last_message_id.map(|id| id.to_string()),
                "updated_at": c.updated_at.to_rfc3339(),
                "peer": {
                    "id": c.peer_id.to_string(),
                    "username": c.peer_username,
                    "display_name": c.peer_display_name,
                    "avatar_hash": c.peer_avatar_hash,
                }
            })
        })
        .collect();

    Ok(Json(json!(result)))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let peer_id: i64 = body
        .peer_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid peer_id".into()))?;

    let peer = barkline_db::users::get_user_by_id(&state.db, peer_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let conversation =
        barkline_core::chat::get_or_create_direct(&state.db, auth.user_id, peer_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": conversation.id.to_string(),
            "kind": conversation.kind,
            "last_message_id": conversation.last_message_id.map(|id| id.to_string()),
            "updated_at": conversation.updated_at.to_rfc3339(),
            "peer": {
                "id": peer.id.to_string(),
                "username": peer.username,
                "display_name": peer.display_name,
                "avatar_hash": peer.avatar_hash,
            }
        })),
    ))
}
