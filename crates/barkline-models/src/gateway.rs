use serde::{Deserialize, Serialize};

// Client -> Server opcodes
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_JOIN_CONVERSATION: u8 = 3;
pub const OP_LEAVE_CONVERSATION: u8 = 4;
pub const OP_SEND_MESSAGE: u8 = 5;
pub const OP_MARK_READ: u8 = 6;

// Server -> Client opcodes
pub const OP_DISPATCH: u8 = 0;
pub const OP_AUTH_FAILURE: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

// Dispatch event names
pub const EVENT_READY: &str = "READY";
pub const EVENT_MESSAGE_RECEIVE: &str = "MESSAGE_RECEIVE";
pub const EVENT_MESSAGE_SENT: &str = "MESSAGE_SENT";
pub const EVENT_NOTIFICATION_CREATE: &str = "NOTIFICATION_CREATE";
pub const EVENT_ERROR: &str = "ERROR";

// Client event payloads (ids travel as strings on the wire)

#[derive(Debug, Clone, Deserialize)]
pub struct JoinConversationPayload {
    pub conversation_id: String,
    /// The other participant; their pending notifications toward us are
    /// cleared when we open the conversation.
    pub peer_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveConversationPayload {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessagePayload {
    pub recipient_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkReadPayload {
    pub message_ids: Vec<String>,
    pub sender_id: String,
}
