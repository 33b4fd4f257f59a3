pub mod auth;
pub mod chat;
pub mod error;
pub mod events;
pub mod presence;

use barkline_db::DbPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub event_bus: events::EventBus,
    /// Process-wide presence state; owned here so handlers can only reach
    /// it through its methods, and a distributed backing store could be
    /// swapped in without touching handler code.
    pub presence: Arc<presence::PresenceRegistry>,
    pub config: AppConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HS256 secret consumed by the credential verifier; token issuance
    /// lives with the account service, not here.
    pub jwt_secret: String,
}
