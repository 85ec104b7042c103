//! MonoTanks Server - authoritative game server for a networked 2-D tank
//! combat game
//!
//! The server runs the simulation at a fixed tick rate, keeps the
//! authoritative world on a square grid, and broadcasts per-recipient,
//! visibility-filtered snapshots over websockets:
//! - players connect at `/`, spectators at `/spectator`
//! - one action per player per tick, correlated by game-state id
//! - optional eager broadcast when every alive bot has replied
//! - optional replay journaling to a single JSON document

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
