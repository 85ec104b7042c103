//! Configuration module - command-line argument parsing

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;

use crate::game::GameConfig;

/// Authoritative MonoTanks game server
#[derive(Parser, Debug, Clone)]
#[command(name = "monotanks-server", version, about)]
pub struct Args {
    /// Host to bind: an IP address, `*` for all interfaces, or `localhost`
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Number of players required to start the match
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(2..=4))]
    pub players: u8,

    /// Milliseconds between state broadcasts
    #[arg(long = "broadcast-interval", default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub broadcast_interval: u64,

    /// Number of simulation ticks before the game ends
    #[arg(long, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..))]
    pub ticks: u64,

    /// Match seed; random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Join code required in handshakes
    #[arg(long = "join-code")]
    pub join_code: Option<String>,

    /// Start immediately and let players join mid-match
    #[arg(long)]
    pub sandbox: bool,

    /// Record the match to a replay file
    #[arg(long = "save-replay")]
    pub save_replay: bool,

    /// Where to write the replay (defaults to a timestamped file)
    #[arg(long = "replay-filepath")]
    pub replay_filepath: Option<PathBuf>,

    /// Allow clobbering an existing replay file
    #[arg(long = "overwrite-replay-file")]
    pub overwrite_replay_file: bool,

    /// Start the next tick as soon as every alive bot has replied
    #[arg(long = "eager-broadcast")]
    pub eager_broadcast: bool,

    /// Side length of the square grid
    #[arg(long = "grid-dimension", default_value_t = 24, value_parser = clap::value_parser!(u8).range(8..=64))]
    pub grid_dimension: u8,
}

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub join_code: Option<String>,
    pub replay_path: Option<PathBuf>,
    pub overwrite_replay: bool,
    pub game: GameConfig,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let host = match args.host.as_str() {
            "*" => "0.0.0.0",
            "localhost" => "127.0.0.1",
            other => other,
        };
        let addr: SocketAddr = format!("{}:{}", host, args.port)
            .parse()
            .map_err(|_| ConfigError::InvalidHost(args.host.clone()))?;

        let replay_path = args.save_replay.then(|| {
            args.replay_filepath
                .clone()
                .unwrap_or_else(default_replay_path)
        });
        if let Some(path) = &replay_path {
            if path.exists() && !args.overwrite_replay_file {
                return Err(ConfigError::ReplayFileExists(path.clone()));
            }
        }

        let seed = args.seed.unwrap_or_else(rand::random);

        Ok(Self {
            addr,
            join_code: args.join_code,
            replay_path,
            overwrite_replay: args.overwrite_replay_file,
            game: GameConfig {
                grid_dim: args.grid_dimension as usize,
                expected_players: args.players as usize,
                seed,
                broadcast_interval: Duration::from_millis(args.broadcast_interval),
                max_ticks: args.ticks,
                sandbox: args.sandbox,
                eager_broadcast: args.eager_broadcast,
                ..GameConfig::default()
            },
        })
    }
}

/// Timestamped name so repeated unconfigured runs do not clobber each other
fn default_replay_path() -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    PathBuf::from(format!("replay_{stamp}.json"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("replay file {0} exists; pass --overwrite-replay-file to replace it")]
    ReplayFileExists(PathBuf),
}
