//! Per-recipient snapshot rendering
//!
//! One world, three views: spectators see everything, a player sees their
//! own tank fully plus whatever their visibility grid admits, and foreign
//! tanks reveal position and facing only. The whole visibility matrix
//! lives in this module so it stays table-testable.

use serde_json::{json, Map, Value};

use crate::game::r#match::{MatchState, PlayerState};
use crate::game::zones::{Zone, ZoneStatus};
use crate::ws::protocol::{
    SerializationContext, TileKind, WireEnum, ZoneStatusKind,
};

/// Who a snapshot is rendered for
#[derive(Debug, Clone)]
pub enum RecipientContext {
    Spectator,
    Player(String),
}

impl RecipientContext {
    fn is_spectator(&self) -> bool {
        matches!(self, RecipientContext::Spectator)
    }

    fn player_id(&self) -> Option<&str> {
        match self {
            RecipientContext::Player(id) => Some(id),
            RecipientContext::Spectator => None,
        }
    }
}

/// Render the world into a `GameState` payload for one recipient.
/// Pure: the same state, recipient, and context produce identical JSON.
pub fn render_game_state(
    state: &MatchState,
    recipient: &RecipientContext,
    ctx: &SerializationContext,
) -> Value {
    let dim = state.grid.dim();
    let viewer = recipient.player_id().and_then(|id| state.players.get(id));

    let tile_visible = |x: i32, y: i32| -> bool {
        if recipient.is_spectator() {
            return true;
        }
        viewer
            .map(|p| p.visibility[y as usize][x as usize])
            .unwrap_or(false)
    };

    let mut tiles: Vec<Vec<Vec<Value>>> = vec![vec![Vec::new(); dim]; dim];

    // Walls are part of the static map and always rendered
    for y in 0..dim as i32 {
        for x in 0..dim as i32 {
            if state.grid.is_wall(x, y) {
                tiles[y as usize][x as usize]
                    .push(json!({ "type": TileKind::Wall.encode(ctx) }));
            }
        }
    }

    // Tanks: own tank always, foreign tanks through the fog
    let mut player_ids: Vec<&String> = state.players.keys().collect();
    player_ids.sort_by(|a, b| {
        let nick_a = state.players.get(*a).map(|p| p.nickname.as_str());
        let nick_b = state.players.get(*b).map(|p| p.nickname.as_str());
        nick_a.cmp(&nick_b).then_with(|| a.cmp(b))
    });
    for id in &player_ids {
        let Some(player) = state.players.get(*id) else {
            continue;
        };
        if player.tank.is_dead() {
            continue;
        }
        let (x, y) = player.tank.position();
        let is_owner = recipient.player_id() == Some(id.as_str());
        if !is_owner && !tile_visible(x, y) {
            continue;
        }
        tiles[y as usize][x as usize].push(render_tank(player, is_owner, recipient, ctx));
    }

    // Bullets: spectators get full fields everywhere, players (owners
    // included) get flight data only and only inside visible tiles
    for bullet in &state.bullets {
        let (x, y) = bullet.tile();
        if !state.grid.in_bounds(x, y) || !tile_visible(x, y) {
            continue;
        }
        let mut entry = Map::new();
        entry.insert("type".into(), TileKind::Bullet.encode(ctx));
        entry.insert("id".into(), json!(bullet.id));
        entry.insert("speed".into(), json!(bullet.speed));
        entry.insert("direction".into(), bullet.direction.encode(ctx));
        if recipient.is_spectator() {
            entry.insert(
                "damage".into(),
                json!(bullet.damage(
                    state.config.bullet_damage,
                    state.config.double_bullet_damage
                )),
            );
            entry.insert("shooterId".into(), json!(bullet.shooter_id));
        }
        tiles[y as usize][x as usize].push(Value::Object(entry));
    }

    // Lasers and mines carry full fields once the tile is visible
    for laser in &state.lasers {
        for &(x, y) in &laser.tiles {
            if !state.grid.in_bounds(x, y) || !tile_visible(x, y) {
                continue;
            }
            tiles[y as usize][x as usize].push(json!({
                "type": TileKind::Laser.encode(ctx),
                "id": laser.id,
                "orientation": laser.orientation.encode(ctx),
                "damage": laser.damage,
            }));
        }
    }
    for mine in &state.mines {
        if !state.grid.in_bounds(mine.x, mine.y) || !tile_visible(mine.x, mine.y) {
            continue;
        }
        let mut entry = Map::new();
        entry.insert("type".into(), TileKind::Mine.encode(ctx));
        entry.insert("id".into(), json!(mine.id));
        entry.insert("damage".into(), json!(mine.damage));
        if let Some(ticks) = mine.explode_remaining_ticks {
            entry.insert("explodeRemainingTicks".into(), json!(ticks));
        }
        tiles[mine.y as usize][mine.x as usize].push(Value::Object(entry));
    }
    for item in &state.items {
        if !state.grid.in_bounds(item.x, item.y) || !tile_visible(item.x, item.y) {
            continue;
        }
        tiles[item.y as usize][item.x as usize].push(json!({
            "type": TileKind::Item.encode(ctx),
            "itemType": item.kind.encode(ctx),
        }));
    }

    let players: Vec<Value> = player_ids
        .iter()
        .filter_map(|id| state.players.get(*id))
        .map(|p| render_player_entry(p, recipient))
        .collect();

    let zones: Vec<Value> = state.zones.iter().map(|z| render_zone(z, ctx)).collect();

    let mut map = Map::new();
    map.insert("tiles".into(), json!(tiles));
    map.insert("zones".into(), Value::Array(zones));
    if let Some(viewer) = viewer {
        map.insert("visibility".into(), json!(viewer.visibility));
    }

    let mut payload = Map::new();
    if recipient.player_id().is_some() {
        payload.insert("id".into(), json!(state.game_state_id));
    }
    payload.insert("tick".into(), json!(state.tick));
    payload.insert("players".into(), Value::Array(players));
    payload.insert("map".into(), Value::Object(map));
    Value::Object(payload)
}

fn render_tank(
    player: &PlayerState,
    is_owner: bool,
    recipient: &RecipientContext,
    ctx: &SerializationContext,
) -> Value {
    let privileged = is_owner || recipient.is_spectator();
    let tank = &player.tank;

    let mut turret = Map::new();
    turret.insert("direction".into(), tank.turret.direction.encode(ctx));
    if privileged {
        turret.insert("bulletCount".into(), json!(tank.turret.bullet_count));
        turret.insert(
            "bulletRegenProgress".into(),
            json!(tank.turret.regen_progress),
        );
    }

    let mut entry = Map::new();
    entry.insert("type".into(), TileKind::Tank.encode(ctx));
    entry.insert("ownerId".into(), json!(player.id));
    entry.insert("direction".into(), tank.direction.encode(ctx));
    entry.insert("turret".into(), Value::Object(turret));
    if privileged {
        entry.insert("health".into(), json!(tank.health));
        entry.insert(
            "secondaryItem".into(),
            match tank.secondary_item {
                Some(item) => item.encode(ctx),
                None => Value::Null,
            },
        );
    }
    Value::Object(entry)
}

fn render_player_entry(player: &PlayerState, recipient: &RecipientContext) -> Value {
    let is_owner = recipient.player_id() == Some(player.id.as_str());
    let mut entry = Map::new();
    entry.insert("id".into(), json!(player.id));
    entry.insert("nickname".into(), json!(player.nickname));
    entry.insert("color".into(), json!(player.color));
    entry.insert("score".into(), json!(player.score));
    entry.insert("kills".into(), json!(player.kills));
    if is_owner || recipient.is_spectator() {
        entry.insert("isUsingRadar".into(), json!(player.is_using_radar));
    }
    Value::Object(entry)
}

fn render_zone(zone: &Zone, ctx: &SerializationContext) -> Value {
    let mut status = Map::new();
    match &zone.status {
        ZoneStatus::Neutral => {
            status.insert("type".into(), ZoneStatusKind::Neutral.encode(ctx));
        }
        ZoneStatus::BeingCaptured {
            player_id,
            progress,
        } => {
            status.insert("type".into(), ZoneStatusKind::BeingCaptured.encode(ctx));
            status.insert("playerId".into(), json!(player_id));
            status.insert("progress".into(), json!(progress));
        }
        ZoneStatus::Captured { player_id } => {
            status.insert("type".into(), ZoneStatusKind::Captured.encode(ctx));
            status.insert("playerId".into(), json!(player_id));
        }
        ZoneStatus::BeingContested {
            captured_by,
            progress,
        } => {
            status.insert("type".into(), ZoneStatusKind::BeingContested.encode(ctx));
            status.insert(
                "capturedById".into(),
                match captured_by {
                    Some(id) => json!(id),
                    None => Value::Null,
                },
            );
            status.insert("progress".into(), json!(progress));
        }
        ZoneStatus::BeingRetaken {
            attacker_id,
            defender_id,
            progress,
        } => {
            status.insert("type".into(), ZoneStatusKind::BeingRetaken.encode(ctx));
            status.insert("retakenById".into(), json!(attacker_id));
            status.insert("capturedById".into(), json!(defender_id));
            status.insert("progress".into(), json!(progress));
        }
    }

    json!({
        "id": zone.id.to_string(),
        "x": zone.x,
        "y": zone.y,
        "width": zone.width,
        "height": zone.height,
        "status": Value::Object(status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameConfig, PlayerKind};

    fn state_with_two_players() -> MatchState {
        let config = GameConfig {
            grid_dim: 10,
            expected_players: 2,
            seed: 42,
            zone_count: 1,
            spawn_count: 4,
            ..GameConfig::default()
        };
        let mut state = MatchState::new(config);
        state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
        state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
        state
    }

    fn find_tanks(payload: &Value) -> Vec<Value> {
        let tiles = payload["map"]["tiles"].as_array().unwrap();
        let mut tanks = Vec::new();
        for row in tiles {
            for tile in row.as_array().unwrap() {
                for entity in tile.as_array().unwrap() {
                    if entity["type"] == json!("tank") {
                        tanks.push(entity.clone());
                    }
                }
            }
        }
        tanks
    }

    #[test]
    fn spectator_sees_all_tanks_with_full_fields() {
        let state = state_with_two_players();
        let ctx = SerializationContext::default();
        let payload = render_game_state(&state, &RecipientContext::Spectator, &ctx);

        let tanks = find_tanks(&payload);
        assert_eq!(tanks.len(), 2);
        for tank in &tanks {
            assert!(tank.get("health").is_some());
            assert!(tank["turret"].get("bulletCount").is_some());
        }
        // No game-state id and no visibility grid for spectators
        assert!(payload.get("id").is_none());
        assert!(payload["map"].get("visibility").is_none());
    }

    #[test]
    fn own_tank_is_privileged_foreign_tank_is_filtered() {
        let mut state = state_with_two_players();
        // Park p2 far away behind the fog: p1 looks up from the corner
        if let Some(p) = state.players.get_mut("p2") {
            p.tank.set_position(9, 9);
        }
        if let Some(p) = state.players.get_mut("p1") {
            p.tank.set_position(0, 0);
            p.tank.direction = crate::game::grid::Direction::Up;
            p.tank.turret.direction = crate::game::grid::Direction::Up;
        }
        state.run_tick(Vec::new());

        let ctx = SerializationContext::default();
        let payload =
            render_game_state(&state, &RecipientContext::Player("p1".into()), &ctx);

        let tanks = find_tanks(&payload);
        let own: Vec<&Value> = tanks
            .iter()
            .filter(|t| t["ownerId"] == json!("p1"))
            .collect();
        assert_eq!(own.len(), 1);
        assert!(own[0].get("health").is_some());

        // p2 out of sight entirely
        assert!(tanks.iter().all(|t| t["ownerId"] != json!("p2")));

        // Player payloads carry the game-state id and their own grid
        assert_eq!(payload["id"], json!(state.game_state_id));
        assert!(payload["map"].get("visibility").is_some());
    }

    #[test]
    fn foreign_tank_in_sight_hides_privileged_fields() {
        let mut state = state_with_two_players();
        if let Some(p) = state.players.get_mut("p1") {
            p.tank.set_position(5, 5);
            p.tank.direction = crate::game::grid::Direction::Up;
            p.tank.turret.direction = crate::game::grid::Direction::Up;
        }
        if let Some(p) = state.players.get_mut("p2") {
            p.tank.set_position(5, 4);
        }
        state.run_tick(Vec::new());

        let ctx = SerializationContext::default();
        let payload =
            render_game_state(&state, &RecipientContext::Player("p1".into()), &ctx);
        let tanks = find_tanks(&payload);
        let foreign: Vec<&Value> = tanks
            .iter()
            .filter(|t| t["ownerId"] == json!("p2"))
            .collect();
        assert_eq!(foreign.len(), 1);
        assert!(foreign[0].get("health").is_none());
        assert!(foreign[0].get("secondaryItem").is_none());
        assert!(foreign[0]["turret"].get("bulletCount").is_none());
        // Facing is part of the filtered-but-visible view
        assert!(foreign[0].get("direction").is_some());
    }

    #[test]
    fn player_bullets_hide_damage_and_shooter() {
        let mut state = state_with_two_players();
        if let Some(p) = state.players.get_mut("p1") {
            p.tank.set_position(5, 5);
            p.tank.turret.direction = crate::game::grid::Direction::Up;
        }
        state.bullets.push(crate::game::combat::Bullet::at_tile(
            7,
            (5, 3),
            crate::game::grid::Direction::Up,
            2.0,
            crate::game::combat::BulletKind::Basic,
            "p2".into(),
        ));
        if let Some(p) = state.players.get_mut("p1") {
            p.visibility = crate::game::visibility::all_visible(10);
        }

        let ctx = SerializationContext::default();
        let bullet_fields = |payload: &Value| -> Option<Value> {
            let tiles = payload["map"]["tiles"].as_array()?.clone();
            for row in tiles {
                for tile in row.as_array()? {
                    for entity in tile.as_array()? {
                        if entity["type"] == json!("bullet") {
                            return Some(entity.clone());
                        }
                    }
                }
            }
            None
        };

        let spectator = render_game_state(&state, &RecipientContext::Spectator, &ctx);
        let seen = bullet_fields(&spectator).expect("spectator sees the bullet");
        assert!(seen.get("damage").is_some());
        assert!(seen.get("shooterId").is_some());

        let player = render_game_state(&state, &RecipientContext::Player("p1".into()), &ctx);
        if let Some(seen) = bullet_fields(&player) {
            assert!(seen.get("damage").is_none());
            assert!(seen.get("shooterId").is_none());
            assert!(seen.get("id").is_some());
            assert!(seen.get("speed").is_some());
        }
    }
}
