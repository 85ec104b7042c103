//! Match state and authoritative tick loop
//!
//! [`MatchState`] owns the whole world and advances it through the fixed
//! tick pipeline; it is purely synchronous so the simulation can be driven
//! directly in tests. [`GameMatch`] wraps it in the scheduler task: fixed
//! cadence, game-state id issuance, broadcast fan-out, eager broadcast, and
//! replay journaling.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::combat::{Bullet, BulletKind, Laser, LaserOrientation, MapItem, Mine};
use crate::game::grid::{Direction, MapGrid};
use crate::game::replay::ReplayJournal;
use crate::game::server::GameServer;
use crate::game::snapshot::{render_game_state, RecipientContext};
use crate::game::tank::{
    SecondaryItem, StunEffect, StunSource, Tank, BLOCK_ABILITY, BLOCK_ALL, BLOCK_MOVEMENT,
};
use crate::game::visibility::{self, VisibilityGrid};
use crate::game::zones::Zone;
use crate::game::{GameConfig, GamePhase, PlayerAction, PlayerKind};
use crate::util::time::TickClock;
use crate::ws::protocol::{
    encode_packet, AbilityType, GameEndPayload, GameEndPlayer, MoveDirection, PacketType,
    SerializationContext,
};

/// Concurrent snapshot encodes/writes during fan-out
const BROADCAST_CONCURRENCY: usize = 8;

/// A send slower than this marks the connection as failed
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-player state inside the match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: String,
    pub nickname: String,
    pub color: u32,
    pub kind: PlayerKind,
    pub score: u64,
    pub kills: u32,
    /// Ticks until a dead tank respawns
    pub respawn_cooldown: u32,
    /// Consumed by the broadcast that renders it, then cleared
    pub is_using_radar: bool,
    pub connected: bool,
    pub tank: Tank,
    pub visibility: VisibilityGrid,
}

/// The authoritative world, mutated only by the tick task
pub struct MatchState {
    pub config: GameConfig,
    pub tick: u64,
    pub grid: MapGrid,
    pub zones: Vec<Zone>,
    pub players: HashMap<String, PlayerState>,
    pub bullets: Vec<Bullet>,
    pub lasers: Vec<Laser>,
    pub mines: Vec<Mine>,
    pub items: Vec<MapItem>,
    pub game_state_id: String,
    pub disconnected_in_game: Vec<String>,
    /// Bullets fired this tick enter flight on the next one
    pending_bullets: Vec<Bullet>,
    rng: ChaCha8Rng,
    id_rng: ChaCha8Rng,
    next_entity_id: u64,
}

impl MatchState {
    pub fn new(config: GameConfig) -> Self {
        // The map draws from its own seeded stream so layout generation
        // never perturbs the simulation's sequence.
        let mut map_rng = ChaCha8Rng::seed_from_u64(config.seed);
        map_rng.set_stream(0);
        let (grid, zones) = MapGrid::generate(
            config.grid_dim,
            config.zone_count,
            config.spawn_count,
            &mut map_rng,
        );
        Self::with_map(config, grid, zones)
    }

    /// Build a match over an explicit map instead of a generated one
    pub fn with_map(config: GameConfig, grid: MapGrid, zones: Vec<Zone>) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(1);
        let mut id_rng = ChaCha8Rng::seed_from_u64(config.seed);
        id_rng.set_stream(2);

        let mut state = Self {
            config,
            tick: 0,
            grid,
            zones,
            players: HashMap::new(),
            bullets: Vec::new(),
            lasers: Vec::new(),
            mines: Vec::new(),
            items: Vec::new(),
            game_state_id: String::new(),
            disconnected_in_game: Vec::new(),
            pending_bullets: Vec::new(),
            rng,
            id_rng,
            next_entity_id: 0,
        };
        state.issue_game_state_id();
        state
    }

    /// Spawn a new player at a free spawn point
    pub fn add_player(&mut self, id: String, nickname: String, color: u32, kind: PlayerKind) {
        let (x, y) = self.pick_free_spawn().unwrap_or((0, 0));
        let direction = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];
        let tank = Tank::new(x, y, direction, id.clone(), self.config.max_bullets);
        let dim = self.grid.dim();
        self.players.insert(
            id.clone(),
            PlayerState {
                id,
                nickname,
                color,
                kind,
                score: 0,
                kills: 0,
                respawn_cooldown: 0,
                is_using_radar: false,
                connected: true,
                tank,
                visibility: visibility::all_hidden(dim),
            },
        );
    }

    /// Run one simulation tick: ordered action application followed by the
    /// fixed world-update phases.
    pub fn run_tick(&mut self, actions: Vec<(String, PlayerAction)>) {
        self.tick += 1;

        for id in self.player_ids_sorted() {
            if let Some(p) = self.players.get_mut(&id) {
                p.tank.begin_tick();
            }
        }

        for (player_id, action) in self.order_actions(actions) {
            self.apply_action(&player_id, action);
        }

        self.step_bullets();
        let mut fired = std::mem::take(&mut self.pending_bullets);
        self.bullets.append(&mut fired);
        self.step_lasers();
        self.step_mines();
        self.step_stuns();
        self.regen_ammo();
        self.respawn_dead();
        self.recompute_visibility();
        self.update_zones();
        self.pickup_items();
        self.spawn_items();
    }

    /// Fresh opaque game-state id for the upcoming broadcast
    pub fn issue_game_state_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.id_rng.fill(&mut bytes);
        let id = Uuid::from_bytes(bytes).to_string();
        self.game_state_id = id.clone();
        id
    }

    /// Radar grids last exactly one broadcast
    pub fn clear_radar_flags(&mut self) {
        for p in self.players.values_mut() {
            p.is_using_radar = false;
        }
    }

    /// Players ranked by score, then kills, then nickname
    pub fn ranked_players(&self) -> Vec<GameEndPlayer> {
        let mut players: Vec<&PlayerState> = self.players.values().collect();
        players.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.kills.cmp(&a.kills))
                .then(a.nickname.cmp(&b.nickname))
        });
        players
            .into_iter()
            .map(|p| GameEndPlayer {
                id: p.id.clone(),
                nickname: p.nickname.clone(),
                score: p.score,
                kills: p.kills,
            })
            .collect()
    }

    /// Retire a player who dropped mid-match; their stats stay for results
    pub fn mark_disconnected(&mut self, player_id: &str) {
        let Some(p) = self.players.get_mut(player_id) else {
            return;
        };
        if !p.connected {
            return;
        }
        p.connected = false;
        let health = p.tank.health;
        if health > 0 {
            p.tank.take_damage(health);
        }
        self.disconnected_in_game.push(player_id.to_string());
    }

    /// Connected, living players; the eager-broadcast candidate set
    pub fn alive_player_ids(&self) -> Vec<String> {
        self.player_ids_sorted()
            .into_iter()
            .filter(|id| {
                self.players
                    .get(id)
                    .map(|p| p.connected && !p.tank.is_dead())
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn all_alive_are_bots(&self) -> bool {
        self.players
            .values()
            .filter(|p| p.connected && !p.tank.is_dead())
            .all(|p| p.kind == PlayerKind::Bot)
    }

    // ------------------------------------------------------------------
    // Phase 1: actions
    // ------------------------------------------------------------------

    /// Stable order (nickname) shuffled with the match PRNG: reproducible
    /// for a seed, unpredictable to clients.
    fn order_actions(
        &mut self,
        mut actions: Vec<(String, PlayerAction)>,
    ) -> Vec<(String, PlayerAction)> {
        actions.sort_by(|a, b| {
            let nick_a = self.players.get(&a.0).map(|p| p.nickname.as_str());
            let nick_b = self.players.get(&b.0).map(|p| p.nickname.as_str());
            nick_a.cmp(&nick_b).then_with(|| a.0.cmp(&b.0))
        });
        actions.shuffle(&mut self.rng);
        actions
    }

    fn apply_action(&mut self, player_id: &str, action: PlayerAction) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        if player.tank.is_dead() {
            return;
        }

        match action {
            PlayerAction::Move(direction) => self.move_tank(player_id, direction),
            PlayerAction::Rotate { tank, turret } => {
                if let Some(p) = self.players.get_mut(player_id) {
                    if let Some(rotation) = tank {
                        p.tank.rotate(rotation);
                    }
                    if let Some(rotation) = turret {
                        p.tank.turret.rotate(rotation);
                    }
                }
            }
            PlayerAction::Ability(kind) => self.use_ability(player_id, kind),
        }
    }

    fn move_tank(&mut self, player_id: &str, direction: MoveDirection) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        if player.tank.is_blocked(BLOCK_MOVEMENT) {
            return;
        }
        let step = match direction {
            MoveDirection::Forward => player.tank.direction,
            MoveDirection::Backward => player.tank.direction.opposite(),
        };
        let (dx, dy) = step.offset();
        let target = (player.tank.x + dx, player.tank.y + dy);

        if self.grid.is_wall(target.0, target.1) {
            return;
        }
        let occupied = self.players.iter().any(|(id, p)| {
            id != player_id && !p.tank.is_dead() && p.tank.position() == target
        });
        if occupied {
            return;
        }
        if let Some(p) = self.players.get_mut(player_id) {
            p.tank.set_position(target.0, target.1);
        }
    }

    fn use_ability(&mut self, player_id: &str, kind: AbilityType) {
        let blocked = self
            .players
            .get(player_id)
            .map(|p| p.tank.is_blocked(BLOCK_ABILITY))
            .unwrap_or(true);
        if blocked {
            return;
        }

        match kind {
            AbilityType::FireBullet => {
                let has_ammo = self
                    .players
                    .get_mut(player_id)
                    .map(|p| p.tank.turret.try_shoot())
                    .unwrap_or(false);
                if has_ammo {
                    self.spawn_bullet(player_id, BulletKind::Basic);
                }
            }
            AbilityType::FireDoubleBullet => {
                if self.consume_item(player_id, SecondaryItem::DoubleBullet) {
                    self.spawn_bullet(player_id, BulletKind::Double);
                }
            }
            AbilityType::UseLaser => self.use_laser(player_id),
            AbilityType::DropMine => self.drop_mine(player_id),
            AbilityType::UseRadar => {
                if self.consume_item(player_id, SecondaryItem::Radar) {
                    if let Some(p) = self.players.get_mut(player_id) {
                        p.is_using_radar = true;
                    }
                }
            }
        }
    }

    fn consume_item(&mut self, player_id: &str, wanted: SecondaryItem) -> bool {
        match self.players.get_mut(player_id) {
            Some(p) if p.tank.secondary_item == Some(wanted) => {
                p.tank.secondary_item = None;
                true
            }
            _ => false,
        }
    }

    /// Spawn a bullet on the tile in front of the shooter, resolving
    /// muzzle collisions immediately. The bullet enters flight next tick.
    fn spawn_bullet(&mut self, shooter_id: &str, kind: BulletKind) {
        let Some(shooter) = self.players.get(shooter_id) else {
            return;
        };
        let (dx, dy) = shooter.tank.turret.direction.offset();
        let tile = (shooter.tank.x + dx, shooter.tank.y + dy);
        let direction = shooter.tank.turret.direction;

        if self.grid.is_wall(tile.0, tile.1) {
            return;
        }

        let damage = match kind {
            BulletKind::Basic => self.config.bullet_damage,
            BulletKind::Double => self.config.double_bullet_damage,
        };
        if let Some(target) = self.living_tank_at(tile) {
            let shooter_id = shooter_id.to_string();
            self.damage_tank(&target, damage, Some(&shooter_id));
            return;
        }
        if let Some(idx) = self.bullets.iter().position(|b| b.tile() == tile) {
            self.bullets.remove(idx);
            return;
        }
        if let Some(idx) = self.pending_bullets.iter().position(|b| b.tile() == tile) {
            self.pending_bullets.remove(idx);
            return;
        }

        let id = self.next_entity_id();
        self.pending_bullets.push(Bullet::at_tile(
            id,
            tile,
            direction,
            self.config.bullet_speed,
            kind,
            shooter_id.to_string(),
        ));
    }

    fn use_laser(&mut self, shooter_id: &str) {
        let Some(shooter) = self.players.get(shooter_id) else {
            return;
        };
        if shooter.tank.secondary_item != Some(SecondaryItem::Laser) {
            return;
        }
        let direction = shooter.tank.turret.direction;
        let (dx, dy) = direction.offset();
        let (mut x, mut y) = (shooter.tank.x + dx, shooter.tank.y + dy);
        let mut tiles = Vec::new();
        while !self.grid.is_wall(x, y) {
            tiles.push((x, y));
            x += dx;
            y += dy;
        }
        if tiles.is_empty() {
            return;
        }

        if !self.consume_item(shooter_id, SecondaryItem::Laser) {
            return;
        }
        let id = self.next_entity_id();
        self.lasers.push(Laser {
            id,
            tiles,
            orientation: LaserOrientation::from(direction),
            damage: self.config.laser_damage,
            remaining_ticks: self.config.laser_lifetime_ticks,
            shooter_id: shooter_id.to_string(),
        });
    }

    fn drop_mine(&mut self, owner_id: &str) {
        let Some(owner) = self.players.get(owner_id) else {
            return;
        };
        if owner.tank.secondary_item != Some(SecondaryItem::Mine) {
            return;
        }
        let (dx, dy) = owner.tank.direction.opposite().offset();
        let tile = (owner.tank.x + dx, owner.tank.y + dy);
        if self.grid.is_wall(tile.0, tile.1) {
            return;
        }
        if self.mines.iter().any(|m| (m.x, m.y) == tile) {
            return;
        }

        if !self.consume_item(owner_id, SecondaryItem::Mine) {
            return;
        }
        let id = self.next_entity_id();
        self.mines.push(Mine::new(
            id,
            tile.0,
            tile.1,
            self.config.mine_damage,
            owner_id.to_string(),
        ));
    }

    // ------------------------------------------------------------------
    // Phase 2: bullets
    // ------------------------------------------------------------------

    /// Advance bullets in unit sub-steps so fast bullets cannot tunnel
    /// through walls, tanks, or each other. Collision priority on each
    /// crossed boundary: wall, tank (co-tile or swap), other bullet.
    fn step_bullets(&mut self) {
        if self.bullets.is_empty() {
            return;
        }
        let count = self.bullets.len();
        let mut destroyed = vec![false; count];
        let mut remaining: Vec<f64> = self.bullets.iter().map(|b| b.speed).collect();
        let sub_steps = remaining.iter().cloned().fold(0.0_f64, f64::max).ceil() as u32;

        for _ in 0..sub_steps {
            let before: Vec<(i32, i32)> = self.bullets.iter().map(Bullet::tile).collect();

            for i in 0..count {
                if destroyed[i] || remaining[i] <= 0.0 {
                    continue;
                }
                let step = remaining[i].min(1.0);
                remaining[i] -= step;
                let (dx, dy) = self.bullets[i].direction.offset();
                self.bullets[i].x += dx as f64 * step;
                self.bullets[i].y += dy as f64 * step;

                let tile = self.bullets[i].tile();
                if tile == before[i] {
                    continue;
                }
                if self.grid.is_wall(tile.0, tile.1) {
                    destroyed[i] = true;
                    continue;
                }
                if let Some(target) = self.bullet_tank_hit(before[i], tile) {
                    let damage = self.bullets[i]
                        .damage(self.config.bullet_damage, self.config.double_bullet_damage);
                    let shooter = self.bullets[i].shooter_id.clone();
                    self.damage_tank(&target, damage, Some(&shooter));
                    destroyed[i] = true;
                }
            }

            // Mutual destruction: co-tile or crossed paths this sub-step
            for i in 0..count {
                if destroyed[i] {
                    continue;
                }
                for j in (i + 1)..count {
                    if destroyed[j] {
                        continue;
                    }
                    let (tile_i, tile_j) = (self.bullets[i].tile(), self.bullets[j].tile());
                    if tile_i == tile_j || (tile_i == before[j] && tile_j == before[i]) {
                        destroyed[i] = true;
                        destroyed[j] = true;
                        break;
                    }
                }
            }
        }

        let mut keep = destroyed.iter().map(|d| !d);
        self.bullets.retain(|_| keep.next().unwrap_or(false));
    }

    /// A living tank standing on `tile`, or one that swapped tiles with the
    /// bullet during this tick's movement.
    fn bullet_tank_hit(&self, before: (i32, i32), tile: (i32, i32)) -> Option<String> {
        for id in self.player_ids_sorted() {
            let Some(p) = self.players.get(&id) else {
                continue;
            };
            if p.tank.is_dead() {
                continue;
            }
            if p.tank.position() == tile {
                return Some(id);
            }
            if p.tank.previous_position() == tile && p.tank.position() == before {
                return Some(id);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Phases 3-7: lasers, mines, stuns, regen, respawn
    // ------------------------------------------------------------------

    fn step_lasers(&mut self) {
        let mut hits: Vec<(String, u8, String)> = Vec::new();
        for laser in &self.lasers {
            for id in self.player_ids_sorted() {
                let Some(p) = self.players.get(&id) else {
                    continue;
                };
                if !p.tank.is_dead() && laser.covers(p.tank.position()) {
                    hits.push((id, laser.damage, laser.shooter_id.clone()));
                }
            }
        }
        for (target, damage, shooter) in hits {
            self.damage_tank(&target, damage, Some(&shooter));
        }

        for laser in &mut self.lasers {
            laser.remaining_ticks = laser.remaining_ticks.saturating_sub(1);
        }
        self.lasers.retain(|l| l.remaining_ticks > 0);
    }

    fn step_mines(&mut self) {
        // Fade-out countdown for detonated mines
        for mine in &mut self.mines {
            if let Some(ticks) = &mut mine.explode_remaining_ticks {
                *ticks = ticks.saturating_sub(1);
            }
        }
        self.mines.retain(|m| m.explode_remaining_ticks != Some(0));

        let ids = self.player_ids_sorted();
        let mut detonations: Vec<usize> = Vec::new();
        for (idx, mine) in self.mines.iter_mut().enumerate() {
            if !mine.is_armed() {
                continue;
            }
            let owner_on_tile = self
                .players
                .get(&mine.owner_id)
                .map(|p| !p.tank.is_dead() && p.tank.position() == (mine.x, mine.y))
                .unwrap_or(false);
            if !owner_on_tile {
                mine.owner_cleared = true;
            }

            let triggered = ids.iter().any(|id| {
                self.players
                    .get(id)
                    .map(|p| {
                        !p.tank.is_dead()
                            && p.tank.position() == (mine.x, mine.y)
                            && mine.triggered_by(&p.id)
                    })
                    .unwrap_or(false)
            });
            if triggered {
                detonations.push(idx);
            }
        }

        for idx in detonations {
            let mine = {
                let mine = &mut self.mines[idx];
                mine.explode_remaining_ticks = Some(self.config.mine_fuse_ticks.max(1));
                mine.clone()
            };
            let radius = self.config.mine_blast_radius;
            let victims: Vec<String> = ids
                .iter()
                .filter(|id| {
                    self.players
                        .get(*id)
                        .map(|p| !p.tank.is_dead() && mine.in_blast(p.tank.x, p.tank.y, radius))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            for victim in victims {
                self.damage_tank(&victim, mine.damage, Some(&mine.owner_id));
                if let Some(p) = self.players.get_mut(&victim) {
                    if !p.tank.is_dead() {
                        p.tank.stun(StunEffect {
                            source: StunSource::MineBlast,
                            blocks: BLOCK_ALL,
                            remaining_ticks: self.config.blast_stun_ticks,
                        });
                    }
                }
            }
        }
    }

    fn step_stuns(&mut self) {
        for p in self.players.values_mut() {
            p.tank.tick_stuns();
        }
    }

    fn regen_ammo(&mut self) {
        let (max_bullets, regen_ticks) = (self.config.max_bullets, self.config.bullet_regen_ticks);
        for p in self.players.values_mut() {
            if !p.tank.is_dead() {
                p.tank.turret.regen(max_bullets, regen_ticks);
            }
        }
    }

    fn respawn_dead(&mut self) {
        for id in self.player_ids_sorted() {
            let ready = {
                let Some(p) = self.players.get_mut(&id) else {
                    continue;
                };
                if !p.tank.is_dead() || !p.connected {
                    continue;
                }
                if p.respawn_cooldown > 0 {
                    p.respawn_cooldown -= 1;
                }
                p.respawn_cooldown == 0
            };
            if !ready {
                continue;
            }
            let Some(spawn) = self.pick_free_spawn() else {
                continue;
            };
            let direction = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];
            let max_bullets = self.config.max_bullets;
            if let Some(p) = self.players.get_mut(&id) {
                p.tank.respawn(spawn.0, spawn.1, direction, max_bullets);
            }
        }
    }

    // ------------------------------------------------------------------
    // Phases 8-10: visibility, zones, items
    // ------------------------------------------------------------------

    fn recompute_visibility(&mut self) {
        let dim = self.grid.dim();
        for id in self.player_ids_sorted() {
            let Some(p) = self.players.get(&id) else {
                continue;
            };
            let grid = if p.tank.is_dead() {
                visibility::all_hidden(dim)
            } else if p.is_using_radar {
                visibility::all_visible(dim)
            } else {
                visibility::compute(
                    &self.grid,
                    p.tank.x,
                    p.tank.y,
                    p.tank.turret.direction,
                    self.config.visibility_range,
                )
            };
            if let Some(p) = self.players.get_mut(&id) {
                p.visibility = grid;
            }
        }
    }

    fn update_zones(&mut self) {
        let capture_ticks = self.config.capture_ticks;
        for zone in &mut self.zones {
            let mut occupants: HashMap<String, usize> = HashMap::new();
            for (id, p) in &self.players {
                if !p.tank.is_dead() && zone.contains(p.tank.x, p.tank.y) {
                    *occupants.entry(id.clone()).or_default() += 1;
                }
            }
            zone.advance(&occupants, capture_ticks);
        }

        let holders: Vec<String> = self
            .zones
            .iter()
            .filter_map(|z| z.holder().map(str::to_owned))
            .collect();
        for holder in holders {
            if let Some(p) = self.players.get_mut(&holder) {
                p.score += 1;
            }
        }
    }

    fn pickup_items(&mut self) {
        let ids = self.player_ids_sorted();
        let players = &mut self.players;
        self.items.retain(|item| {
            for id in &ids {
                if let Some(p) = players.get_mut(id) {
                    if !p.tank.is_dead()
                        && p.tank.position() == (item.x, item.y)
                        && p.tank.secondary_item.is_none()
                    {
                        p.tank.secondary_item = Some(item.kind);
                        return false;
                    }
                }
            }
            true
        });
    }

    fn spawn_items(&mut self) {
        let interval = self.config.item_spawn_ticks as u64;
        if interval == 0 || self.tick % interval != 0 {
            return;
        }
        if self.items.len() >= self.players.len().max(1) {
            return;
        }

        let dim = self.grid.dim() as i32;
        for _ in 0..20 {
            let x = self.rng.gen_range(0..dim);
            let y = self.rng.gen_range(0..dim);
            if self.grid.is_wall(x, y)
                || self.items.iter().any(|i| (i.x, i.y) == (x, y))
                || self.mines.iter().any(|m| (m.x, m.y) == (x, y))
                || self.living_tank_at((x, y)).is_some()
            {
                continue;
            }
            let kind = match self.rng.gen_range(0..4) {
                0 => SecondaryItem::Laser,
                1 => SecondaryItem::DoubleBullet,
                2 => SecondaryItem::Radar,
                _ => SecondaryItem::Mine,
            };
            self.items.push(MapItem { x, y, kind });
            break;
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn player_ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.players.keys().cloned().collect();
        ids.sort_by(|a, b| {
            let nick_a = self.players.get(a).map(|p| p.nickname.as_str());
            let nick_b = self.players.get(b).map(|p| p.nickname.as_str());
            nick_a.cmp(&nick_b).then_with(|| a.cmp(b))
        });
        ids
    }

    fn living_tank_at(&self, tile: (i32, i32)) -> Option<String> {
        for id in self.player_ids_sorted() {
            if let Some(p) = self.players.get(&id) {
                if !p.tank.is_dead() && p.tank.position() == tile {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Apply damage to a tank and resolve kill accounting: the attacker
    /// gets a kill and heals, the victim starts its respawn countdown.
    fn damage_tank(&mut self, target_id: &str, amount: u8, attacker_id: Option<&str>) {
        let Some(outcome) = self
            .players
            .get_mut(target_id)
            .map(|p| p.tank.take_damage(amount))
        else {
            return;
        };
        if !outcome.killed {
            return;
        }
        if let Some(p) = self.players.get_mut(target_id) {
            p.respawn_cooldown = self.config.respawn_ticks;
        }
        if let Some(attacker) = attacker_id {
            if attacker != target_id {
                let heal = self.config.heal_on_kill;
                if let Some(a) = self.players.get_mut(attacker) {
                    a.kills += 1;
                    a.tank.heal(heal);
                }
            }
        }
    }

    fn pick_free_spawn(&mut self) -> Option<(i32, i32)> {
        let occupied: HashSet<(i32, i32)> = self
            .players
            .values()
            .filter(|p| !p.tank.is_dead())
            .map(|p| p.tank.position())
            .collect();
        let candidates: Vec<(i32, i32)> = self
            .grid
            .spawn_points()
            .iter()
            .copied()
            .filter(|tile| !occupied.contains(tile))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..candidates.len());
        Some(candidates[idx])
    }

    fn next_entity_id(&mut self) -> u64 {
        self.next_entity_id += 1;
        self.next_entity_id
    }
}

/// The scheduler task: owns the [`MatchState`] and drives the fixed-cadence
/// loop from lobby start to `GameEnd`.
pub struct GameMatch {
    state: MatchState,
    server: Arc<GameServer>,
    replay: Option<ReplayJournal>,
}

impl GameMatch {
    pub fn new(config: GameConfig, server: Arc<GameServer>, replay: Option<ReplayJournal>) -> Self {
        Self {
            state: MatchState::new(config),
            server,
            replay,
        }
    }

    /// Run the match to completion. Returns when the game has ended and
    /// all connections were told.
    pub async fn run(mut self) {
        self.server.wait_for_start().await;

        for entry in self.server.lobby_players() {
            self.state
                .add_player(entry.id, entry.nickname, entry.color, entry.kind);
        }
        self.server.set_phase(GamePhase::Running);
        info!(
            players = self.state.players.len(),
            seed = self.state.config.seed,
            "match starting"
        );

        self.server
            .broadcast_payload(PacketType::GameStarting, serde_json::json!({}))
            .await;
        self.server
            .broadcast_payload(PacketType::GameStart, serde_json::json!({}))
            .await;

        if let Some(replay) = &mut self.replay {
            let lobby = self.server.lobby_data(None);
            match serde_json::to_value(&lobby) {
                Ok(value) => replay.record_lobby(value),
                Err(e) => error!(error = %e, "failed to serialize lobby data for replay"),
            }
        }

        let mut clock = TickClock::new(self.state.config.broadcast_interval);
        loop {
            clock.begin_tick();
            if self.state.tick >= self.state.config.max_ticks {
                break;
            }

            if self.state.config.sandbox {
                self.admit_late_players();
            }
            self.sync_connections();

            let actions = self.server.drain_actions();
            self.state.run_tick(actions);

            let state_id = self.state.issue_game_state_id();
            let eager = if self.state.config.eager_broadcast && self.state.all_alive_are_bots() {
                Some(self.state.alive_player_ids())
            } else {
                None
            };
            self.server.begin_new_tick(state_id, eager);

            self.broadcast_game_state().await;

            if let Some(replay) = &mut self.replay {
                let spectator_ctx = SerializationContext::default();
                replay.record_tick(render_game_state(
                    &self.state,
                    &RecipientContext::Spectator,
                    &spectator_ctx,
                ));
            }

            self.state.clear_radar_flags();

            match clock.remaining() {
                None => {
                    warn!(
                        tick = self.state.tick,
                        elapsed_ms = clock.elapsed().as_millis() as u64,
                        interval_ms = clock.interval().as_millis() as u64,
                        "tick overran the broadcast interval"
                    );
                    continue;
                }
                Some(remaining) => self.sleep_until_next_tick(remaining).await,
            }
        }

        self.finish().await;
    }

    /// Wait out the rest of the interval, or wake early once every alive
    /// bot has answered the freshly broadcast state.
    async fn sleep_until_next_tick(&self, remaining: Duration) {
        if !self.state.config.eager_broadcast {
            tokio::time::sleep(remaining).await;
            return;
        }
        let deadline = tokio::time::Instant::now() + remaining;
        loop {
            if self.server.eager_ready() {
                debug!(tick = self.state.tick, "eager broadcast: all bots answered");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.server.eager_wakeup() => {}
            }
        }
    }

    /// Sandbox mode admits players into the running match
    fn admit_late_players(&mut self) {
        for entry in self.server.lobby_players() {
            if !self.state.players.contains_key(&entry.id) {
                info!(player_id = %entry.id, nickname = %entry.nickname, "late join");
                self.state
                    .add_player(entry.id, entry.nickname, entry.color, entry.kind);
            }
        }
    }

    /// Pull connection liveness into the world: dropped players are
    /// retired but retained for results.
    fn sync_connections(&mut self) {
        let connected = self.server.connected_player_ids();
        let ids: Vec<String> = self.state.players.keys().cloned().collect();
        for id in ids {
            let was_connected = self
                .state
                .players
                .get(&id)
                .map(|p| p.connected)
                .unwrap_or(false);
            if was_connected && !connected.contains(&id) {
                warn!(player_id = %id, "player disconnected mid-match");
                self.state.mark_disconnected(&id);
            }
        }
    }

    /// Render and deliver per-recipient snapshots with bounded concurrency.
    /// A failed or timed-out write marks that connection as failed without
    /// holding up the others.
    async fn broadcast_game_state(&self) {
        let targets = self.server.connection_targets();
        let failed: Mutex<Vec<Uuid>> = Mutex::new(Vec::new());
        let state = &self.state;

        futures::stream::iter(targets)
            .for_each_concurrent(BROADCAST_CONCURRENCY, |target| {
                let failed = &failed;
                async move {
                    let payload = render_game_state(state, &target.recipient, &target.ctx);
                    let frame = match encode_packet(PacketType::GameState, payload, &target.ctx) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(conn_id = %target.conn_id, error = %e, "snapshot encoding failed");
                            if let Ok(mut failed) = failed.lock() {
                                failed.push(target.conn_id);
                            }
                            return;
                        }
                    };
                    let message = axum::extract::ws::Message::Text(frame);
                    let sent = tokio::time::timeout(SEND_TIMEOUT, target.tx.send(message)).await;
                    if !matches!(sent, Ok(Ok(()))) {
                        debug!(conn_id = %target.conn_id, "broadcast write failed");
                        if let Ok(mut failed) = failed.lock() {
                            failed.push(target.conn_id);
                        }
                    }
                }
            })
            .await;

        let failed = failed.into_inner().unwrap_or_default();
        for conn_id in failed {
            self.server.close_connection(&conn_id);
        }
    }

    async fn finish(&mut self) {
        let ranked = self.state.ranked_players();
        info!(
            tick = self.state.tick,
            winner = ranked.first().map(|p| p.nickname.as_str()).unwrap_or(""),
            "match ended"
        );

        self.server.set_final_ranking(ranked.clone());
        self.server.set_phase(GamePhase::Ended);

        let payload = GameEndPayload { players: ranked };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                self.server
                    .broadcast_payload(PacketType::GameEnd, value.clone())
                    .await;
                if let Some(replay) = self.replay.take() {
                    let valid = self.state.disconnected_in_game.is_empty();
                    if let Err(e) = replay.finalize(value, valid) {
                        error!(error = %e, "failed to write replay");
                    }
                }
            }
            Err(e) => error!(error = %e, "failed to serialize game end payload"),
        }

        self.server.close_all_connections();
        self.server.signal_shutdown();
    }
}
