use crate::error::CoreError;
use crate::presence::PresenceRegistry;
use barkline_db::conversations::{self, ConversationRow};
use barkline_db::messages::{self, MessageRow};
use barkline_db::notifications::{self, NotificationRow};
use barkline_db::{friendships, users, DbPool};
use barkline_util::validation;
use chrono::Utc;

const WORKER_ID: u16 = 1;

/// Everything the caller needs to fan out after a successful send.
#[derive(Debug)]
pub struct SendOutcome {
    pub message: MessageRow,
    pub conversation: ConversationRow,
    /// Present only when a brand-new unread notification row was created;
    /// coalesced bumps of an existing row don't re-notify the recipient.
    pub new_notification: Option<NotificationRow>,
}

/// Find-or-create the direct conversation for an unordered pair.
///
/// The application-level find-then-create has a race window under
/// concurrent sends; the pair-key unique index is the authoritative
/// guard, and a violation on insert means another caller won — re-fetch
/// and use their row.
pub async fn get_or_create_direct(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<ConversationRow, CoreError> {
    if user_a == user_b {
        return Err(CoreError::BadRequest(
            "Cannot open a conversation with yourself".into(),
        ));
    }

    if let Some(existing) = conversations::find_direct_between(pool, user_a, user_b).await? {
        return Ok(existing);
    }

    let conversation_id = barkline_util::snowflake::generate(WORKER_ID);
    match conversations::create_direct(pool, conversation_id, user_a, user_b).await {
        Ok(row) => Ok(row),
        Err(barkline_db::DbError::Sqlx(err)) if barkline_db::is_unique_violation(&err) => {
            conversations::find_direct_between(pool, user_a, user_b)
                .await?
                .ok_or_else(|| {
                    CoreError::Internal("conversation missing after unique violation".into())
                })
        }
        Err(e) => Err(e.into()),
    }
}

/// The send pipeline shared by the gateway and the REST route:
/// validate content, gate on mutual friendship, resolve the conversation,
/// persist the message, then coalesce the recipient's notification unless
/// they are actively viewing the conversation.
///
/// A notification-store failure after the message is persisted is logged
/// and swallowed — delivery and notification are separate steps, and a
/// persisted message is never reported as failed.
pub async fn send_direct_message(
    pool: &DbPool,
    presence: &PresenceRegistry,
    sender_id: i64,
    recipient_id: i64,
    content: &str,
) -> Result<SendOutcome, CoreError> {
    let content = validation::validate_message_content(content)
        .map_err(|e| CoreError::BadRequest(e.to_string()))?;

    if users::get_user_by_id(pool, recipient_id).await?.is_none() {
        return Err(CoreError::NotFound);
    }

    if !friendships::are_mutual_friends(pool, sender_id, recipient_id).await? {
        return Err(CoreError::Forbidden);
    }

    let conversation = get_or_create_direct(pool, sender_id, recipient_id).await?;

    let now = Utc::now();
    let message = messages::create_message(
        pool,
        barkline_util::snowflake::generate(WORKER_ID),
        conversation.id,
        sender_id,
        recipient_id,
        content,
        now,
    )
    .await?;

    let new_notification = if presence.is_viewing(recipient_id, conversation.id) {
        None
    } else {
        match notifications::upsert_message_notification(
            pool,
            barkline_util::snowflake::generate(WORKER_ID),
            sender_id,
            recipient_id,
            message.id,
            now,
        )
        .await
        {
            Ok((row, true)) => Some(row),
            Ok((_, false)) => None,
            Err(err) => {
                tracing::warn!(
                    sender_id,
                    recipient_id,
                    message_id = message.id,
                    "notification coalescing failed after send: {err}"
                );
                None
            }
        }
    };

    Ok(SendOutcome {
        message,
        conversation,
        new_notification,
    })
}

/// Opening a conversation: record it in the viewer's viewing set and
/// clear the pending notifications from the other participant.
pub async fn open_conversation(
    pool: &DbPool,
    presence: &PresenceRegistry,
    user_id: i64,
    conversation_id: i64,
    peer_id: i64,
) -> Result<(), CoreError> {
    presence.join_conversation(user_id, conversation_id);
    notifications::mark_read_from_sender(pool, user_id, peer_id).await?;
    Ok(())
}

/// Flip message read flags, then the related notification read state.
/// The two updates are sequenced rather than transactional; both are
/// idempotent, so a retry converges.
pub async fn mark_messages_read(
    pool: &DbPool,
    recipient_id: i64,
    sender_id: i64,
    message_ids: &[i64],
) -> Result<u64, CoreError> {
    let flipped = messages::mark_read(pool, recipient_id, message_ids).await?;
    notifications::mark_read_from_sender(pool, recipient_id, sender_id).await?;
    Ok(flipped)
}
