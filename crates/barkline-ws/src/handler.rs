use axum::extract::ws::{CloseFrame, Message, WebSocket};
use barkline_core::error::CoreError;
use barkline_core::{chat, AppState};
use barkline_db::messages::MessageRow;
use barkline_db::notifications::NotificationRow;
use barkline_db::users::UserRow;
use barkline_models::gateway::*;
use barkline_util::validation;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{Duration, Instant};

use crate::session::Session;

const HEARTBEAT_INTERVAL_MS: u64 = 25000;
const HEARTBEAT_TIMEOUT_MS: u64 = 60000;
const IDENTIFY_TIMEOUT_SECS: u64 = 30;
const HEARTBEAT_ACK_MSG: &str = r#"{"op":11}"#;
const HELLO_MSG_PREFIX: &str = r#"{"op":10,"d":{"heartbeat_interval":"#;
const HELLO_MSG_SUFFIX: &str = r#"}}"#;

/// Close code for a failed handshake; the structured auth-failure payload
/// is delivered before this close frame.
const CLOSE_AUTH_FAILURE: u16 = 4001;

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Send HELLO
    let hello_msg = format!(
        "{}{}{}",
        HELLO_MSG_PREFIX, HEARTBEAT_INTERVAL_MS, HELLO_MSG_SUFFIX
    );
    if sender.send(Message::Text(hello_msg.into())).await.is_err() {
        return;
    }

    // Wait for IDENTIFY; the handshake fails fast rather than completing
    // and erroring later.
    let identify_timeout = Duration::from_secs(IDENTIFY_TIMEOUT_SECS);
    let user = match tokio::time::timeout(
        identify_timeout,
        wait_for_identify(&mut receiver, &state),
    )
    .await
    {
        Ok(Ok(user)) => user,
        Ok(Err(reason)) => {
            reject_handshake(&mut sender, &reason).await;
            return;
        }
        Err(_) => {
            reject_handshake(&mut sender, "Handshake timed out").await;
            return;
        }
    };

    let mut session = Session::new(user.id);

    // Subscribe before registering presence so nothing published after
    // registration can be missed.
    let event_rx = state.event_bus.subscribe();
    state.presence.register(user.id, &session.session_id);
    tracing::info!(
        user_id = user.id,
        session_id = %session.session_id,
        online = state.presence.online_count(),
        "gateway connection authenticated"
    );

    let ready = json!({
        "op": OP_DISPATCH,
        "t": EVENT_READY,
        "s": session.next_sequence(),
        "d": {
            "user": public_user_json(&user),
            "session_id": &session.session_id,
        }
    });
    if sender
        .send(Message::Text(ready.to_string().into()))
        .await
        .is_err()
    {
        state.presence.unregister(user.id, &session.session_id);
        return;
    }

    let session = run_session(sender, receiver, session, &user, state.clone(), event_rx).await;

    state.presence.unregister(session.user_id, &session.session_id);
    state.presence.clear_viewing(session.user_id);
}

async fn wait_for_identify(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &AppState,
) -> Result<UserRow, String> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
            return Err("Malformed handshake payload".to_string());
        };
        if frame.op != OP_IDENTIFY {
            return Err("Expected identify as the first message".to_string());
        }
        let token = frame
            .d
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|v| v.as_str());
        let Some(token) = token else {
            return Err("Authentication token missing".to_string());
        };
        let claims = barkline_core::auth::validate_token(token, &state.config.jwt_secret)
            .map_err(|e| e.to_string())?;
        let user = barkline_db::users::get_user_by_id(&state.db, claims.sub)
            .await
            .map_err(|e| {
                tracing::error!("handshake identity lookup failed: {e}");
                "Storage error during handshake".to_string()
            })?
            .ok_or_else(|| "Unknown identity".to_string())?;
        return Ok(user);
    }
    Err("Connection closed before identify".to_string())
}

async fn reject_handshake(sender: &mut (impl SinkExt<Message> + Unpin), reason: &str) {
    tracing::info!("gateway handshake rejected: {reason}");
    let payload = json!({ "op": OP_AUTH_FAILURE, "d": { "message": reason } });
    let _ = sender.send(Message::Text(payload.to_string().into())).await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_AUTH_FAILURE,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn run_session(
    mut sender: impl SinkExt<Message> + Unpin,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    mut session: Session,
    user: &UserRow,
    state: AppState,
    mut event_rx: tokio::sync::broadcast::Receiver<barkline_core::events::ServerEvent>,
) -> Session {
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let heartbeat_sleep = tokio::time::sleep(heartbeat_timeout);
    tokio::pin!(heartbeat_sleep);

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
                            tracing::debug!("Unparseable frame from client {}", session.user_id);
                            continue;
                        };
                        if frame.op == OP_HEARTBEAT {
                            heartbeat_sleep.as_mut().reset(Instant::now() + heartbeat_timeout);
                        }
                        handle_client_message(&frame, &mut sender, &mut session, user, &state).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break if let Some(frame) = frame {
                            format!("client close frame (code={}, reason={})", frame.code, frame.reason)
                        } else {
                            "client close frame (no code/reason)".to_string()
                        };
                    }
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !session.should_receive(&event.target_user_ids) {
                            continue;
                        }
                        // Last-writer-wins delivery: a superseded tab stays
                        // connected but stops receiving targeted events.
                        if !state.presence.is_current(session.user_id, &session.session_id) {
                            continue;
                        }

                        let seq = session.next_sequence();
                        let dispatch = json!({
                            "op": OP_DISPATCH,
                            "t": event.event_type,
                            "s": seq,
                            "d": event.payload,
                        });
                        if sender.send(Message::Text(dispatch.to_string().into())).await.is_err() {
                            break "websocket send error".to_string();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Gateway event stream lagged for user {} (missed {} events); forcing reconnect",
                            session.user_id,
                            skipped
                        );
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 1013,
                                reason: "Gateway fell behind; reconnect required".into(),
                            })))
                            .await;
                        break format!("event stream lagged by {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break "event stream closed".to_string();
                    }
                }
            }
            () = &mut heartbeat_sleep => {
                break format!("heartbeat timeout after {}ms", HEARTBEAT_TIMEOUT_MS);
            }
        }
    };

    tracing::info!(
        "Client {} disconnected: {}",
        session.user_id,
        disconnect_reason
    );
    session
}

async fn handle_client_message(
    frame: &GatewayMessage,
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &mut Session,
    user: &UserRow,
    state: &AppState,
) {
    match frame.op {
        OP_HEARTBEAT => {
            let _ = sender
                .send(Message::Text(HEARTBEAT_ACK_MSG.to_string().into()))
                .await;
        }
        OP_JOIN_CONVERSATION => {
            let Some(d) = frame.d.as_ref() else { return };
            let Ok(join) = serde_json::from_value::<JoinConversationPayload>(d.clone()) else {
                send_error(sender, session, "Malformed join payload").await;
                return;
            };
            let ids = validation::parse_id(&join.conversation_id)
                .and_then(|c| validation::parse_id(&join.peer_id).map(|p| (c, p)));
            let Ok((conversation_id, peer_id)) = ids else {
                send_error(sender, session, "Invalid conversation or peer id").await;
                return;
            };
            if let Err(err) = chat::open_conversation(
                &state.db,
                &state.presence,
                session.user_id,
                conversation_id,
                peer_id,
            )
            .await
            {
                tracing::warn!(
                    user_id = session.user_id,
                    conversation_id,
                    "join failed: {err}"
                );
                send_error(sender, session, &error_message(&err)).await;
            }
        }
        OP_LEAVE_CONVERSATION => {
            let Some(d) = frame.d.as_ref() else { return };
            let Ok(leave) = serde_json::from_value::<LeaveConversationPayload>(d.clone()) else {
                send_error(sender, session, "Malformed leave payload").await;
                return;
            };
            let Ok(conversation_id) = validation::parse_id(&leave.conversation_id) else {
                send_error(sender, session, "Invalid conversation id").await;
                return;
            };
            state
                .presence
                .leave_conversation(session.user_id, conversation_id);
        }
        OP_SEND_MESSAGE => {
            let Some(d) = frame.d.as_ref() else { return };
            let Ok(send) = serde_json::from_value::<SendMessagePayload>(d.clone()) else {
                send_error(sender, session, "Malformed send payload").await;
                return;
            };
            let Ok(recipient_id) = validation::parse_id(&send.recipient_id) else {
                send_error(sender, session, "Invalid recipient id").await;
                return;
            };

            match chat::send_direct_message(
                &state.db,
                &state.presence,
                session.user_id,
                recipient_id,
                &send.content,
            )
            .await
            {
                Ok(outcome) => {
                    let message_payload = message_json(&outcome.message);

                    // Confirmation to the sender only after persistence
                    // succeeded; a failed send never looks sent.
                    let seq = session.next_sequence();
                    let confirmation = json!({
                        "op": OP_DISPATCH,
                        "t": EVENT_MESSAGE_SENT,
                        "s": seq,
                        "d": message_payload,
                    });
                    let _ = sender
                        .send(Message::Text(confirmation.to_string().into()))
                        .await;

                    state.event_bus.dispatch_to_user(
                        EVENT_MESSAGE_RECEIVE,
                        message_payload,
                        recipient_id,
                    );

                    if let Some(notification) = &outcome.new_notification {
                        state.event_bus.dispatch_to_user(
                            EVENT_NOTIFICATION_CREATE,
                            notification_json(notification, user),
                            recipient_id,
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        sender_id = session.user_id,
                        recipient_id,
                        "send failed: {err}"
                    );
                    send_error(sender, session, &error_message(&err)).await;
                }
            }
        }
        OP_MARK_READ => {
            let Some(d) = frame.d.as_ref() else { return };
            let Ok(mark) = serde_json::from_value::<MarkReadPayload>(d.clone()) else {
                send_error(sender, session, "Malformed mark-read payload").await;
                return;
            };
            let Ok(sender_id) = validation::parse_id(&mark.sender_id) else {
                send_error(sender, session, "Invalid sender id").await;
                return;
            };
            let ids: Result<Vec<i64>, _> = mark
                .message_ids
                .iter()
                .map(|raw| validation::parse_id(raw))
                .collect();
            let Ok(ids) = ids else {
                send_error(sender, session, "Invalid message id").await;
                return;
            };

            if let Err(err) =
                chat::mark_messages_read(&state.db, session.user_id, sender_id, &ids).await
            {
                tracing::warn!(user_id = session.user_id, "mark-read failed: {err}");
                send_error(sender, session, &error_message(&err)).await;
            }
        }
        _ => {
            tracing::debug!("Unknown opcode {} from client {}", frame.op, session.user_id);
        }
    }
}

/// Per-event errors go back to the offending connection only; the
/// connection stays open.
async fn send_error(
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &mut Session,
    message: &str,
) {
    let seq = session.next_sequence();
    let payload = json!({
        "op": OP_DISPATCH,
        "t": EVENT_ERROR,
        "s": seq,
        "d": { "message": message },
    });
    let _ = sender.send(Message::Text(payload.to_string().into())).await;
}

fn error_message(err: &CoreError) -> String {
    match err {
        CoreError::Forbidden => "You can only message mutual friends".to_string(),
        CoreError::NotFound => "Unknown recipient".to_string(),
        CoreError::BadRequest(msg) => msg.clone(),
        CoreError::Database(_) => "Storage error, please retry".to_string(),
        CoreError::Internal(_) => "Internal error".to_string(),
    }
}

fn public_user_json(user: &UserRow) -> Value {
    json!({
        "id": user.id.to_string(),
        "username": user.username,
        "display_name": user.display_name,
        "avatar_hash": user.avatar_hash,
    })
}

fn message_json(message: &MessageRow) -> Value {
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

fn notification_json(notification: &NotificationRow, sender: &UserRow) -> Value {
    json!({
        "id": notification.id.to_string(),
        "kind": notification.kind,
        "sender_id": notification.sender_id.to_string(),
        "recipient_id": notification.recipient_id.to_string(),
        "message_id": notification.message_id.to_string(),
        "read": notification.read,
        "created_at": notification.created_at.to_rfc3339(),
        "updated_at": notification.updated_at.to_rfc3339(),
        "sender": public_user_json(sender),
    })
}
