use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use barkline_core::AppState;
use barkline_models::conversation::ConversationKind;
use barkline_models::gateway::{EVENT_MESSAGE_RECEIVE, EVENT_NOTIFICATION_CREATE};
use barkline_util::pagination::PaginationParams;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub sender_id: String,
    pub message_ids: Vec<String>,
}

fn message_json(message: &barkline_db::messages::MessageRow) -> Value {
    json!({
        "id": message.id.to_string(),
        "conversation_id": message.conversation_id.to_string(),
        "sender_id": message.sender_id.to_string(),
        "recipient_id": message.recipient_id.to_string(),
        "content": message.content,
        "read": message.read,
        "created_at": message.created_at.to_rfc3339(),
    })
}

pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Value>, ApiError> {
    if !barkline_db::conversations::is_member(&state.db, conversation_id, auth.user_id).await? {
        return Err(ApiError::Forbidden);
    }

    let messages = barkline_db::messages::get_conversation_messages(
        &state.db,
        conversation_id,
        params.before,
        params.limit(),
    )
    .await?;

    let result: Vec<Value> = messages.iter().map(message_json).collect();
    Ok(Json(json!(result)))
}

/// HTTP twin of the gateway send: same core pipeline, and the same bus
/// events so connected recipients see REST-sent messages live.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let conversation = barkline_db::conversations::get_conversation(&state.db, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if ConversationKind::from_i16(conversation.kind) != ConversationKind::Direct {
        return Err(ApiError::BadRequest(
            "Only direct conversations accept messages here".into(),
        ));
    }

    let members = barkline_db::conversations::get_member_ids(&state.db, conversation_id).await?;
    if !members.contains(&auth.user_id) {
        return Err(ApiError::Forbidden);
    }
    let recipient_id = members
        .into_iter()
        .find(|&id| id != auth.user_id)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("direct conversation without peer")))?;

    let outcome = barkline_core::chat::send_direct_message(
        &state.db,
        &state.presence,
        auth.user_id,
        recipient_id,
        &body.content,
    )
    .await?;

    let payload = message_json(&outcome.message);
    state
        .event_bus
        .dispatch_to_user(EVENT_MESSAGE_RECEIVE, payload.clone(), recipient_id);

    if let Some(notification) = &outcome.new_notification {
        let sender = barkline_db::users::get_user_by_id(&state.db, auth.user_id)
            .await
            .ok()
            .flatten();
        state.event_bus.dispatch_to_user(
            EVENT_NOTIFICATION_CREATE,
            json!({
                "id": notification.id.to_string(),
                "kind": notification.kind,
                "sender_id": notification.sender_id.to_string(),
                "recipient_id": notification.recipient_id.to_string(),
                "message_id": notification.message_id.to_string(),
                "read": notification.read,
                "created_at": notification.created_at.to_rfc3339(),
                "updated_at": notification.updated_at.to_rfc3339(),
                "sender": sender.map(|u| json!({
                    "id": u.id.to_string(),
                    "username": u.username,
                    "display_name": u.display_name,
                    "avatar_hash": u.avatar_hash,
                })),
            }),
            recipient_id,
        );
    }

    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<Value>, ApiError> {
    if !barkline_db::conversations::is_member(&state.db, conversation_id, auth.user_id).await? {
        return Err(ApiError::Forbidden);
    }

    let sender_id: i64 = body
        .sender_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid sender_id".into()))?;
    let message_ids: Vec<i64> = body
        .message_ids
        .iter()
        .map(|raw| raw.parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ApiError::BadRequest("Invalid message id".into()))?;

    let flipped =
        barkline_core::chat::mark_messages_read(&state.db, auth.user_id, sender_id, &message_ids)
            .await?;

    Ok(Json(json!({ "read_count": flipped })))
}
