//! End-to-end simulation scenarios
//!
//! These drive the authoritative world tick by tick, without sockets, and
//! check the behavior a client would observe in its snapshots.

use monotanks_server::game::combat::{Bullet, BulletKind};
use monotanks_server::game::grid::{Direction, MapGrid, Rotation};
use monotanks_server::game::snapshot::{render_game_state, RecipientContext};
use monotanks_server::game::tank::SecondaryItem;
use monotanks_server::game::zones::{Zone, ZoneStatus};
use monotanks_server::game::{
    GameConfig, GamePhase, GameServer, MatchState, PlayerAction, PlayerKind,
};
use monotanks_server::ws::protocol::{
    ActionPacket, AbilityType, MoveDirection, SerializationContext,
};
use serde_json::{json, Value};

fn test_config(dim: usize) -> GameConfig {
    GameConfig {
        grid_dim: dim,
        expected_players: 2,
        seed: 7,
        bullet_speed: 1.0,
        // No random pickups dropping into scripted scenarios
        item_spawn_ticks: 0,
        ..GameConfig::default()
    }
}

/// A fully open map with corner spawn points
fn open_state(config: GameConfig, zones: Vec<Zone>) -> MatchState {
    let dim = config.grid_dim;
    let spawns = vec![
        (0, 0),
        (dim as i32 - 1, dim as i32 - 1),
        (0, dim as i32 - 1),
        (dim as i32 - 1, 0),
    ];
    let grid = MapGrid::from_parts(dim, vec![vec![false; dim]; dim], spawns);
    MatchState::with_map(config, grid, zones)
}

fn place(state: &mut MatchState, id: &str, tile: (i32, i32), facing: Direction) {
    let player = state.players.get_mut(id).expect("player exists");
    player.tank.set_position(tile.0, tile.1);
    player.tank.direction = facing;
    player.tank.turret.direction = facing;
}

fn act(id: &str, action: PlayerAction) -> Vec<(String, PlayerAction)> {
    vec![(id.to_string(), action)]
}

#[test]
fn single_shot_hits_after_four_ticks() {
    let mut state = open_state(test_config(10), Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (2, 5), Direction::Right);
    place(&mut state, "p2", (6, 5), Direction::Left);

    state.run_tick(act("p1", PlayerAction::Ability(AbilityType::FireBullet)));
    assert_eq!(state.bullets.len(), 1, "bullet spawned on the muzzle tile");
    assert_eq!(state.bullets[0].tile(), (3, 5));
    assert_eq!(state.players["p2"].tank.health, 100);

    state.run_tick(Vec::new());
    state.run_tick(Vec::new());
    assert_eq!(state.bullets[0].tile(), (5, 5));

    state.run_tick(Vec::new());
    let expected = 100 - state.config.bullet_damage;
    assert_eq!(state.players["p2"].tank.health, expected);
    assert!(state.bullets.is_empty(), "bullet consumed by the hit");
}

#[test]
fn second_action_in_a_tick_is_dropped() {
    let server = GameServer::new(test_config(10), None);
    let reg = server
        .register_player("alice", PlayerKind::Human, false)
        .unwrap();
    server.set_phase(GamePhase::Running);
    server.begin_new_tick("s1".into(), None);

    server
        .submit_action(
            &reg.player_id,
            ActionPacket {
                action: PlayerAction::Move(MoveDirection::Forward),
                game_state_id: Some("s1".into()),
            },
        )
        .expect("first action admitted");
    assert!(server
        .submit_action(
            &reg.player_id,
            ActionPacket {
                action: PlayerAction::Rotate {
                    tank: Some(Rotation::Left),
                    turret: None,
                },
                game_state_id: Some("s1".into()),
            },
        )
        .is_err());

    let actions = server.drain_actions();
    assert_eq!(actions.len(), 1);

    let mut state = open_state(test_config(10), Vec::new());
    state.add_player(
        reg.player_id.clone(),
        "alice".into(),
        0xFF0000,
        PlayerKind::Human,
    );
    place(&mut state, &reg.player_id, (5, 5), Direction::Up);
    state.run_tick(actions);

    // Exactly one tile of movement, no rotation
    let tank = &state.players[&reg.player_id].tank;
    assert_eq!(tank.position(), (5, 4));
    assert_eq!(tank.direction, Direction::Up);
}

#[test]
fn stale_game_state_id_is_silently_dropped() {
    let server = GameServer::new(test_config(10), None);
    let reg = server
        .register_player("alice", PlayerKind::Human, false)
        .unwrap();
    server.set_phase(GamePhase::Running);
    server.begin_new_tick("tick-5-id".into(), None);
    server.begin_new_tick("tick-6-id".into(), None);

    let stale = server.submit_action(
        &reg.player_id,
        ActionPacket {
            action: PlayerAction::Move(MoveDirection::Forward),
            game_state_id: Some("tick-5-id".into()),
        },
    );
    assert!(stale.is_err());

    // The rejection must not burn the player's action for this tick
    assert!(server
        .submit_action(
            &reg.player_id,
            ActionPacket {
                action: PlayerAction::Move(MoveDirection::Forward),
                game_state_id: Some("tick-6-id".into()),
            },
        )
        .is_ok());
}

#[test]
fn zone_capture_progresses_then_scores_every_tick() {
    let mut config = test_config(10);
    config.capture_ticks = 3;
    let zone = Zone::new('A', 4, 4, 3, 3);
    let mut state = open_state(config, vec![zone]);
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    place(&mut state, "p1", (5, 5), Direction::Up);

    state.run_tick(Vec::new());
    assert_eq!(
        state.zones[0].status,
        ZoneStatus::BeingCaptured {
            player_id: "p1".into(),
            progress: 1
        }
    );

    state.run_tick(Vec::new());
    state.run_tick(Vec::new());
    assert_eq!(
        state.zones[0].status,
        ZoneStatus::Captured {
            player_id: "p1".into()
        }
    );
    let score_at_capture = state.players["p1"].score;

    state.run_tick(Vec::new());
    state.run_tick(Vec::new());
    assert_eq!(state.players["p1"].score, score_at_capture + 2);
}

#[test]
fn fog_of_war_hides_flank_until_radar() {
    let mut config = test_config(10);
    config.visibility_range = 7;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    state.add_player("p3".into(), "carol".into(), 0x0000FF, PlayerKind::Human);
    place(&mut state, "p1", (5, 8), Direction::Up);
    place(&mut state, "p2", (5, 5), Direction::Down); // straight ahead
    place(&mut state, "p3", (9, 8), Direction::Left); // on the flank

    let ctx = SerializationContext::default();
    let recipient = RecipientContext::Player("p1".into());

    state.run_tick(Vec::new());
    let snapshot = render_game_state(&state, &recipient, &ctx);
    let owners = tank_owner_ids(&snapshot);
    assert!(owners.contains(&"p2".to_string()));
    assert!(!owners.contains(&"p3".to_string()));

    // Radar reveals the whole grid for exactly one broadcast
    if let Some(p) = state.players.get_mut("p1") {
        p.tank.secondary_item = Some(SecondaryItem::Radar);
    }
    state.run_tick(act("p1", PlayerAction::Ability(AbilityType::UseRadar)));
    let snapshot = render_game_state(&state, &recipient, &ctx);
    assert!(tank_owner_ids(&snapshot).contains(&"p3".to_string()));
    state.clear_radar_flags();

    state.run_tick(Vec::new());
    let snapshot = render_game_state(&state, &recipient, &ctx);
    assert!(!tank_owner_ids(&snapshot).contains(&"p3".to_string()));
}

#[test]
fn bullets_meeting_head_on_destroy_each_other() {
    let mut state = open_state(test_config(10), Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    place(&mut state, "p1", (0, 0), Direction::Down);

    // Two tiles apart: both step onto the middle tile this tick
    state.bullets.push(Bullet::at_tile(
        101,
        (2, 5),
        Direction::Right,
        1.0,
        BulletKind::Basic,
        "p1".into(),
    ));
    state.bullets.push(Bullet::at_tile(
        102,
        (4, 5),
        Direction::Left,
        1.0,
        BulletKind::Basic,
        "p1".into(),
    ));
    state.run_tick(Vec::new());
    assert!(state.bullets.is_empty());

    // One tile apart: they swap tiles, which also counts as a collision
    state.bullets.push(Bullet::at_tile(
        103,
        (2, 5),
        Direction::Right,
        1.0,
        BulletKind::Basic,
        "p1".into(),
    ));
    state.bullets.push(Bullet::at_tile(
        104,
        (3, 5),
        Direction::Left,
        1.0,
        BulletKind::Basic,
        "p1".into(),
    ));
    state.run_tick(Vec::new());
    assert!(state.bullets.is_empty());
    assert_eq!(state.players["p1"].tank.health, 100);
}

#[test]
fn fast_bullet_cannot_tunnel_through_a_tank() {
    let mut config = test_config(12);
    config.bullet_speed = 8.0;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (0, 0), Direction::Down);
    place(&mut state, "p2", (5, 5), Direction::Up);

    state.bullets.push(Bullet::at_tile(
        42,
        (1, 5),
        Direction::Right,
        8.0,
        BulletKind::Basic,
        "p1".into(),
    ));
    state.run_tick(Vec::new());

    let expected = 100 - state.config.bullet_damage;
    assert_eq!(state.players["p2"].tank.health, expected);
    assert!(state.bullets.is_empty());
}

#[test]
fn kills_award_the_attacker_and_heal() {
    let mut config = test_config(10);
    config.bullet_damage = 100;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (2, 5), Direction::Right);
    place(&mut state, "p2", (4, 5), Direction::Left);
    if let Some(p) = state.players.get_mut("p1") {
        p.tank.take_damage(50);
    }

    state.run_tick(act("p1", PlayerAction::Ability(AbilityType::FireBullet)));
    state.run_tick(Vec::new());

    let victim = &state.players["p2"];
    assert!(victim.tank.is_dead());
    assert_eq!(victim.tank.position(), (-1, -1));

    let attacker = &state.players["p1"];
    assert_eq!(attacker.kills, 1);
    assert_eq!(attacker.tank.health, 50 + state.config.heal_on_kill);
}

#[test]
fn health_stays_in_range_and_dead_means_sentinel() {
    let mut config = test_config(10);
    config.respawn_ticks = 3;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (2, 5), Direction::Right);
    place(&mut state, "p2", (4, 5), Direction::Left);

    for tick in 0..30 {
        let actions = if tick % 2 == 0 {
            act("p1", PlayerAction::Ability(AbilityType::FireBullet))
        } else {
            act("p2", PlayerAction::Ability(AbilityType::FireBullet))
        };
        state.run_tick(actions);

        for player in state.players.values() {
            assert!(player.tank.health <= 100);
            assert_eq!(
                player.tank.is_dead(),
                player.tank.position() == (-1, -1),
                "dead tanks and only dead tanks sit on the sentinel tile"
            );
        }
    }
}

#[test]
fn same_seed_and_actions_produce_identical_spectator_json() {
    let script = |tick: u64| -> Vec<(String, PlayerAction)> {
        match tick % 3 {
            0 => vec![
                ("p1".to_string(), PlayerAction::Move(MoveDirection::Forward)),
                (
                    "p2".to_string(),
                    PlayerAction::Rotate {
                        tank: Some(Rotation::Left),
                        turret: Some(Rotation::Right),
                    },
                ),
            ],
            1 => vec![(
                "p1".to_string(),
                PlayerAction::Ability(AbilityType::FireBullet),
            )],
            _ => Vec::new(),
        }
    };

    let run = || -> Vec<String> {
        let mut config = GameConfig::default();
        config.grid_dim = 16;
        config.seed = 99;
        let mut state = MatchState::new(config);
        state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Bot);
        state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Bot);

        let ctx = SerializationContext::default();
        let mut frames = Vec::new();
        for tick in 0..30 {
            state.run_tick(script(tick));
            let snapshot = render_game_state(&state, &RecipientContext::Spectator, &ctx);
            frames.push(snapshot.to_string());
        }
        frames
    };

    assert_eq!(run(), run());
}

#[test]
fn mine_detonation_damages_and_stuns_the_blast_area() {
    let mut config = test_config(10);
    config.mine_blast_radius = 1;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (5, 5), Direction::Up);
    place(&mut state, "p2", (5, 8), Direction::Up);
    if let Some(p) = state.players.get_mut("p1") {
        p.tank.secondary_item = Some(SecondaryItem::Mine);
    }

    // Mine lands behind the tank, at (5, 6)
    state.run_tick(act("p1", PlayerAction::Ability(AbilityType::DropMine)));
    assert_eq!(state.mines.len(), 1);
    assert_eq!((state.mines[0].x, state.mines[0].y), (5, 6));

    // Walk the victim onto it
    state.run_tick(act("p2", PlayerAction::Move(MoveDirection::Forward)));
    state.run_tick(act("p2", PlayerAction::Move(MoveDirection::Forward)));
    let victim = &state.players["p2"];
    assert_eq!(victim.tank.health, 100 - state.config.mine_damage);
    assert!(!state.mines[0].is_armed());

    // Stunned: movement is blocked while the stun lasts
    let before = state.players["p2"].tank.position();
    state.run_tick(act("p2", PlayerAction::Move(MoveDirection::Forward)));
    assert_eq!(state.players["p2"].tank.position(), before);
}

#[test]
fn items_are_picked_up_by_the_first_tank_standing_on_them() {
    let mut state = open_state(test_config(10), Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    place(&mut state, "p1", (3, 3), Direction::Right);
    state.items.push(monotanks_server::game::combat::MapItem {
        x: 4,
        y: 3,
        kind: SecondaryItem::Laser,
    });

    state.run_tick(act("p1", PlayerAction::Move(MoveDirection::Forward)));
    assert!(state.items.is_empty());
    assert_eq!(
        state.players["p1"].tank.secondary_item,
        Some(SecondaryItem::Laser)
    );

    // A held item blocks further pickups
    state.items.push(monotanks_server::game::combat::MapItem {
        x: 5,
        y: 3,
        kind: SecondaryItem::Radar,
    });
    state.run_tick(act("p1", PlayerAction::Move(MoveDirection::Forward)));
    assert_eq!(state.items.len(), 1);
    assert_eq!(
        state.players["p1"].tank.secondary_item,
        Some(SecondaryItem::Laser)
    );
}

#[test]
fn laser_damages_every_covered_tank_each_tick() {
    let mut config = test_config(10);
    config.laser_damage = 10;
    config.laser_lifetime_ticks = 2;
    let mut state = open_state(config, Vec::new());
    state.add_player("p1".into(), "alice".into(), 0xFF0000, PlayerKind::Human);
    state.add_player("p2".into(), "bob".into(), 0x00FF00, PlayerKind::Human);
    place(&mut state, "p1", (1, 5), Direction::Right);
    place(&mut state, "p2", (7, 5), Direction::Left);
    if let Some(p) = state.players.get_mut("p1") {
        p.tank.secondary_item = Some(SecondaryItem::Laser);
    }

    state.run_tick(act("p1", PlayerAction::Ability(AbilityType::UseLaser)));
    assert_eq!(state.lasers.len(), 1);
    assert_eq!(state.players["p2"].tank.health, 90);

    // Second tick of existence burns again, then the beam expires
    state.run_tick(Vec::new());
    assert_eq!(state.players["p2"].tank.health, 80);
    assert!(state.lasers.is_empty());

    state.run_tick(Vec::new());
    assert_eq!(state.players["p2"].tank.health, 80);
}

fn tank_owner_ids(snapshot: &Value) -> Vec<String> {
    let mut owners = Vec::new();
    if let Some(rows) = snapshot["map"]["tiles"].as_array() {
        for row in rows {
            for tile in row.as_array().into_iter().flatten() {
                for entity in tile.as_array().into_iter().flatten() {
                    if entity["type"] == json!("tank") {
                        if let Some(owner) = entity["ownerId"].as_str() {
                            owners.push(owner.to_string());
                        }
                    }
                }
            }
        }
    }
    owners
}
