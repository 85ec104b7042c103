//! Tank and turret entities with invariant-preserving operations
//!
//! Tanks never expose raw health mutation: damage saturates at zero, healing
//! caps at [`MAX_HEALTH`] and is rejected for dead tanks. A dead tank parks
//! at the `(-1, -1)` sentinel until respawn.

use std::collections::HashMap;

use crate::game::grid::{Direction, Rotation};

pub const MAX_HEALTH: u8 = 100;

/// Sentinel position of a dead tank
pub const DEAD_POSITION: (i32, i32) = (-1, -1);

// Blocked-action bits carried by a stun effect
pub const BLOCK_MOVEMENT: u8 = 1;
pub const BLOCK_ROTATION: u8 = 1 << 1;
pub const BLOCK_ABILITY: u8 = 1 << 2;
pub const BLOCK_ALL: u8 = BLOCK_MOVEMENT | BLOCK_ROTATION | BLOCK_ABILITY;

/// What applied a stun; one active effect per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StunSource {
    MineBlast,
}

#[derive(Debug, Clone, Copy)]
pub struct StunEffect {
    pub source: StunSource,
    pub blocks: u8,
    pub remaining_ticks: u32,
}

/// One-shot capability a tank may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryItem {
    Laser,
    DoubleBullet,
    Radar,
    Mine,
}

/// Result of applying damage to a tank
#[derive(Debug, Clone, Copy, Default)]
pub struct DamageOutcome {
    pub damage_dealt: u8,
    pub killed: bool,
}

#[derive(Debug, Clone)]
pub struct Turret {
    pub direction: Direction,
    pub bullet_count: u32,
    pub regen_progress: u32,
}

impl Turret {
    pub fn new(direction: Direction, max_bullets: u32) -> Self {
        Self {
            direction,
            bullet_count: max_bullets,
            regen_progress: 0,
        }
    }

    pub fn rotate(&mut self, rotation: Rotation) {
        self.direction = self.direction.rotated(rotation);
    }

    /// Consume one bullet if available
    pub fn try_shoot(&mut self) -> bool {
        if self.bullet_count == 0 {
            return false;
        }
        self.bullet_count -= 1;
        true
    }

    /// Advance ammo regeneration by one tick
    pub fn regen(&mut self, max_bullets: u32, regen_ticks: u32) {
        if self.bullet_count >= max_bullets {
            self.regen_progress = 0;
            return;
        }
        self.regen_progress += 1;
        if self.regen_progress >= regen_ticks {
            self.bullet_count += 1;
            self.regen_progress = 0;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tank {
    pub x: i32,
    pub y: i32,
    pub prev_x: i32,
    pub prev_y: i32,
    pub direction: Direction,
    pub health: u8,
    pub owner_id: String,
    pub turret: Turret,
    pub secondary_item: Option<SecondaryItem>,
    stuns: HashMap<StunSource, StunEffect>,
}

impl Tank {
    pub fn new(x: i32, y: i32, direction: Direction, owner_id: String, max_bullets: u32) -> Self {
        Self {
            x,
            y,
            prev_x: x,
            prev_y: y,
            direction,
            health: MAX_HEALTH,
            owner_id,
            turret: Turret::new(direction, max_bullets),
            secondary_item: None,
            stuns: HashMap::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn previous_position(&self) -> (i32, i32) {
        (self.prev_x, self.prev_y)
    }

    /// Snapshot the current position as the previous one. Called at tick
    /// entry so bullets can resolve swap collisions within the tick.
    pub fn begin_tick(&mut self) {
        self.prev_x = self.x;
        self.prev_y = self.y;
    }

    pub fn is_blocked(&self, mask: u8) -> bool {
        self.stuns.values().any(|s| s.blocks & mask != 0)
    }

    /// Rotate the hull; no-op under a rotation-blocking stun
    pub fn rotate(&mut self, rotation: Rotation) {
        if self.is_blocked(BLOCK_ROTATION) {
            return;
        }
        self.direction = self.direction.rotated(rotation);
    }

    pub fn set_position(&mut self, x: i32, y: i32) {
        self.prev_x = self.x;
        self.prev_y = self.y;
        self.x = x;
        self.y = y;
    }

    /// Apply damage, saturating at zero. Kill accounting (attacker kill
    /// count, heal-on-kill) is resolved by the caller from the outcome.
    pub fn take_damage(&mut self, amount: u8) -> DamageOutcome {
        if self.is_dead() {
            return DamageOutcome::default();
        }
        let dealt = amount.min(self.health);
        self.health -= dealt;
        let killed = self.health == 0;
        if killed {
            self.x = DEAD_POSITION.0;
            self.y = DEAD_POSITION.1;
        }
        DamageOutcome {
            damage_dealt: dealt,
            killed,
        }
    }

    /// Heal up to [`MAX_HEALTH`]; rejected when dead
    pub fn heal(&mut self, amount: u8) {
        if self.is_dead() {
            return;
        }
        self.health = self.health.saturating_add(amount).min(MAX_HEALTH);
    }

    /// Apply or refresh a stun effect
    pub fn stun(&mut self, effect: StunEffect) {
        self.stuns.insert(effect.source, effect);
    }

    /// Decrement stun timers, dropping expired effects
    pub fn tick_stuns(&mut self) {
        for effect in self.stuns.values_mut() {
            effect.remaining_ticks = effect.remaining_ticks.saturating_sub(1);
        }
        self.stuns.retain(|_, effect| effect.remaining_ticks > 0);
    }

    /// Reset the tank at a spawn point with full health and a fresh turret
    pub fn respawn(&mut self, x: i32, y: i32, direction: Direction, max_bullets: u32) {
        self.x = x;
        self.y = y;
        self.prev_x = x;
        self.prev_y = y;
        self.direction = direction;
        self.health = MAX_HEALTH;
        self.turret = Turret::new(direction, max_bullets);
        self.secondary_item = None;
        self.stuns.clear();
    }
}
