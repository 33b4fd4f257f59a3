use serde::{Deserialize, Serialize};

/// Direct conversations are the only kind served by the realtime path;
/// the group variant exists in the schema only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum ConversationKind {
    Direct = 0,
    Group = 1,
}

impl ConversationKind {
    pub fn from_i16(raw: i16) -> Self {
        match raw {
            1 => Self::Group,
            _ => Self::Direct,
        }
    }
}
