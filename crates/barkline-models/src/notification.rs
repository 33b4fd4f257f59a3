use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum NotificationKind {
    MessageReceived = 0,
}

impl NotificationKind {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}
