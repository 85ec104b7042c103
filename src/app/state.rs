//! Application state shared across routes

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::game::GameServer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub server: Arc<GameServer>,
    /// Process start, for the health probe's uptime
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let server = Arc::new(GameServer::new(
            config.game.clone(),
            config.join_code.clone(),
        ));
        Self {
            config,
            server,
            started: Instant::now(),
        }
    }
}
