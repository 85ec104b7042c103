//! Game simulation modules

pub mod combat;
pub mod grid;
pub mod r#match;
pub mod replay;
pub mod server;
pub mod snapshot;
pub mod tank;
pub mod visibility;
pub mod zones;

pub use r#match::{GameMatch, MatchState, PlayerState};
pub use server::GameServer;

use std::time::Duration;

use crate::game::grid::Rotation;
use crate::ws::protocol::{AbilityType, MoveDirection};

/// A validated per-tick action from one player
#[derive(Debug, Clone)]
pub enum PlayerAction {
    Move(MoveDirection),
    Rotate {
        tank: Option<Rotation>,
        turret: Option<Rotation>,
    },
    Ability(AbilityType),
}

/// Match lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Waiting for players
    Lobby,
    /// Match in progress
    Running,
    /// Match ended
    Ended,
}

/// Whether a player connection declared itself a human or a bot.
/// Eager broadcast only engages when every alive player is a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Human,
    Bot,
}

impl PlayerKind {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "human" => Some(PlayerKind::Human),
            "bot" => Some(PlayerKind::Bot),
            _ => None,
        }
    }
}

/// Simulation and scheduling parameters for one match
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub grid_dim: usize,
    pub expected_players: usize,
    pub seed: u64,
    pub broadcast_interval: Duration,
    pub max_ticks: u64,
    pub sandbox: bool,
    pub eager_broadcast: bool,

    pub zone_count: usize,
    pub spawn_count: usize,

    pub bullet_speed: f64,
    pub bullet_damage: u8,
    pub double_bullet_damage: u8,
    pub bullet_regen_ticks: u32,
    pub max_bullets: u32,

    /// Applied once per tick of the laser's existence to each covered tank
    pub laser_damage: u8,
    pub laser_lifetime_ticks: u32,

    pub mine_damage: u8,
    /// Chebyshev radius of the detonation
    pub mine_blast_radius: i32,
    /// Visual fade after detonation
    pub mine_fuse_ticks: u32,
    pub blast_stun_ticks: u32,

    pub respawn_ticks: u32,
    pub capture_ticks: u32,
    pub visibility_range: u32,
    pub heal_on_kill: u8,

    /// Spawn a pickup item every this many ticks (0 disables)
    pub item_spawn_ticks: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_dim: 24,
            expected_players: 4,
            seed: 0,
            broadcast_interval: Duration::from_millis(100),
            max_ticks: 3000,
            sandbox: false,
            eager_broadcast: false,
            zone_count: 2,
            spawn_count: 8,
            bullet_speed: 2.0,
            bullet_damage: 20,
            double_bullet_damage: 40,
            bullet_regen_ticks: 10,
            max_bullets: 3,
            laser_damage: 40,
            laser_lifetime_ticks: 2,
            mine_damage: 50,
            mine_blast_radius: 1,
            mine_fuse_ticks: 10,
            blast_stun_ticks: 5,
            respawn_ticks: 50,
            capture_ticks: 100,
            visibility_range: 12,
            heal_on_kill: 40,
            item_spawn_ticks: 25,
        }
    }
}
