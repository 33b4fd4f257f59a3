use dashmap::DashMap;
use std::collections::HashSet;

/// In-memory presence state for a single gateway process: which session
/// currently speaks for each user, and which conversations each user has
/// open in their UI. Nothing here is persisted; a restart loses all of it
/// and clients re-announce on reconnect.
///
/// Registration is last-writer-wins: a user opening a second tab silently
/// replaces their previous session as the delivery target.
#[derive(Default)]
pub struct PresenceRegistry {
    sessions: DashMap<i64, String>,
    viewing: DashMap<i64, HashSet<i64>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: i64, session_id: &str) {
        self.sessions.insert(user_id, session_id.to_string());
    }

    pub fn lookup(&self, user_id: i64) -> Option<String> {
        self.sessions.get(&user_id).map(|s| s.clone())
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.sessions.contains_key(&user_id)
    }

    /// Whether the given session is still the user's delivery target.
    /// The gateway loop checks this before pushing targeted events, so a
    /// superseded tab stays connected but stops receiving them.
    pub fn is_current(&self, user_id: i64, session_id: &str) -> bool {
        self.sessions
            .get(&user_id)
            .map(|s| s.as_str() == session_id)
            .unwrap_or(false)
    }

    /// Remove the user's presence entry, but only if the closing session
    /// still owns it — an old connection's teardown must not evict a newer
    /// registration.
    pub fn unregister(&self, user_id: i64, session_id: &str) {
        self.sessions
            .remove_if(&user_id, |_, current| current == session_id);
    }

    pub fn join_conversation(&self, user_id: i64, conversation_id: i64) {
        self.viewing
            .entry(user_id)
            .or_default()
            .insert(conversation_id);
    }

    pub fn leave_conversation(&self, user_id: i64, conversation_id: i64) {
        if let Some(mut set) = self.viewing.get_mut(&user_id) {
            set.remove(&conversation_id);
        }
    }

    pub fn is_viewing(&self, user_id: i64, conversation_id: i64) -> bool {
        self.viewing
            .get(&user_id)
            .map(|set| set.contains(&conversation_id))
            .unwrap_or(false)
    }

    /// Drop the user's entire viewing set; called on disconnect.
    pub fn clear_viewing(&self, user_id: i64) {
        self.viewing.remove(&user_id);
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }
}
