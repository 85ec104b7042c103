//! MonoTanks Server - main entry point
//!
//! Parses the command line, wires up the shared state, spawns the match
//! task, and serves websocket upgrades until the match ends or the process
//! is told to stop.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monotanks_server::app::AppState;
use monotanks_server::config::{Args, Config};
use monotanks_server::game::replay::ReplayJournal;
use monotanks_server::game::{GameMatch, GameServer};
use monotanks_server::http::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args)?;

    init_tracing();

    info!("Starting MonoTanks Server");
    info!(
        addr = %config.addr,
        players = config.game.expected_players,
        seed = config.game.seed,
        sandbox = config.game.sandbox,
        "configuration loaded"
    );

    // The replay journal is created up front so a bad path fails fast
    let replay = match &config.replay_path {
        Some(path) => Some(ReplayJournal::create(
            path,
            config.overwrite_replay,
            !config.game.sandbox,
        )?),
        None => None,
    };

    let state = AppState::new(config.clone());

    // One match per server process
    let game_match = GameMatch::new(config.game.clone(), state.server.clone(), replay);
    tokio::spawn(game_match.run());

    let router = build_router(state.clone());
    let listener = TcpListener::bind(config.addr).await?;

    info!("Player endpoint:    ws://{}/", config.addr);
    info!("Spectator endpoint: ws://{}/spectator", config.addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.server.clone()))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolve when the process should stop: Ctrl+C, SIGTERM, or the match
/// finishing on its own.
async fn shutdown_signal(server: Arc<GameServer>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
        _ = server.wait_shutdown() => {
            info!("Match finished, shutting down");
        }
    }
}
