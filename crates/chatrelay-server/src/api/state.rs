use chatrelay_core::AppCore;
use std::sync::Arc;

/// Everything the API handlers share.
pub struct ServerState {
    pub core: AppCore,
    /// Model given to conversations created without one.
    pub default_model: String,
}

pub type AppState = Arc<ServerState>;
