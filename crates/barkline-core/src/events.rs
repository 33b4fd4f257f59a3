use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Deliver only to these user ids; every event in this system is
    /// addressed to specific identities, never broadcast blindly.
    pub target_user_ids: Vec<i64>,
}

/// Broadcast-based event bus for real-time dispatch. Gateway sessions
/// subscribe and filter by target; the HTTP routes publish through the
/// same bus so both paths stay consistent.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ServerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch_to_user(&self, event_type: &str, payload: serde_json::Value, user_id: i64) {
        self.dispatch_to_users(event_type, payload, vec![user_id]);
    }

    pub fn dispatch_to_users(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        target_user_ids: Vec<i64>,
    ) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            target_user_ids,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
