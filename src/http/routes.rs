//! HTTP route definitions

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::game::GamePhase;
use crate::ws::handler::{ws_player_handler, ws_spectator_handler};

/// Build the application router: player upgrades at `/`, spectator
/// upgrades at `/spectator`, plus a health probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_player_handler))
        .route("/spectator", get(ws_spectator_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    phase: &'static str,
    players: usize,
    spectators: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let phase = match state.server.phase() {
        GamePhase::Lobby => "lobby",
        GamePhase::Running => "running",
        GamePhase::Ended => "ended",
    };
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        phase,
        players: state.server.player_count(),
        spectators: state.server.spectator_count(),
    })
}
