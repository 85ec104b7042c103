//! Wire protocol tests: envelope round-trips, both enum formats, and the
//! exact field names clients depend on.

use monotanks_server::game::PlayerAction;
use monotanks_server::ws::protocol::{
    decode_packet, encode_packet, invalid_usage, parse_action, AbilityType, EnumFormat,
    GameEndPayload, GameEndPlayer, LobbyDataPayload, LobbyPlayer, LobbySettings, MoveDirection,
    PacketType, SerializationContext, WireEnum,
};
use serde_json::{json, Value};

fn contexts() -> [SerializationContext; 2] {
    [
        SerializationContext {
            format: EnumFormat::Int,
        },
        SerializationContext {
            format: EnumFormat::Name,
        },
    ]
}

#[test]
fn action_packets_round_trip_in_both_formats() {
    for ctx in contexts() {
        let movement = encode_packet(
            PacketType::Movement,
            json!({"direction": MoveDirection::Forward.encode(&ctx), "gameStateId": "id-1"}),
            &ctx,
        )
        .unwrap();
        let envelope = decode_packet(&movement).unwrap();
        assert_eq!(envelope.packet_type, PacketType::Movement);
        let parsed = parse_action(&envelope).unwrap();
        assert!(matches!(
            parsed.action,
            PlayerAction::Move(MoveDirection::Forward)
        ));
        assert_eq!(parsed.game_state_id.as_deref(), Some("id-1"));

        let ability = encode_packet(
            PacketType::AbilityUse,
            json!({"abilityType": AbilityType::DropMine.encode(&ctx), "gameStateId": "id-2"}),
            &ctx,
        )
        .unwrap();
        let parsed = parse_action(&decode_packet(&ability).unwrap()).unwrap();
        assert!(matches!(
            parsed.action,
            PlayerAction::Ability(AbilityType::DropMine)
        ));
    }
}

#[test]
fn envelope_type_field_matches_the_negotiated_format() {
    let int_ctx = SerializationContext {
        format: EnumFormat::Int,
    };
    let frame = encode_packet(PacketType::Ping, json!({}), &int_ctx).unwrap();
    let raw: Value = serde_json::from_str(&frame).unwrap();
    assert!(raw["type"].is_number());

    let name_ctx = SerializationContext {
        format: EnumFormat::Name,
    };
    let frame = encode_packet(PacketType::Ping, json!({}), &name_ctx).unwrap();
    let raw: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(raw["type"], json!("ping"));
}

#[test]
fn decoder_accepts_frames_from_either_format() {
    let as_int = r#"{"type": 10, "payload": {"direction": 0, "gameStateId": "x"}}"#;
    let as_name = r#"{"type": "movement", "payload": {"direction": "forward", "gameStateId": "x"}}"#;

    for frame in [as_int, as_name] {
        let envelope = decode_packet(frame).unwrap();
        assert_eq!(envelope.packet_type, PacketType::Movement);
        let parsed = parse_action(&envelope).unwrap();
        assert!(matches!(
            parsed.action,
            PlayerAction::Move(MoveDirection::Forward)
        ));
    }
}

#[test]
fn malformed_frames_are_decode_errors() {
    assert!(decode_packet("not json at all").is_err());
    assert!(decode_packet(r#"[1, 2, 3]"#).is_err());
    assert!(decode_packet(r#"{"payload": {}}"#).is_err());
    assert!(decode_packet(r#"{"type": "teleport", "payload": {}}"#).is_err());
}

#[test]
fn lobby_data_uses_the_wire_field_names() {
    let payload = LobbyDataPayload {
        player_id: Some("p1".into()),
        players: vec![LobbyPlayer {
            id: "p1".into(),
            nickname: "alice".into(),
            color: 0xFF0000,
        }],
        settings: LobbySettings {
            grid_dimension: 24,
            number_of_players: 4,
            seed: 7,
            broadcast_interval: 100,
            ticks: 3000,
            sandbox: false,
            eager_broadcast: true,
        },
    };

    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["playerId"], json!("p1"));
    assert_eq!(value["players"][0]["nickname"], json!("alice"));
    assert_eq!(value["settings"]["gridDimension"], json!(24));
    assert_eq!(value["settings"]["numberOfPlayers"], json!(4));
    assert_eq!(value["settings"]["broadcastInterval"], json!(100));
    assert_eq!(value["settings"]["eagerBroadcast"], json!(true));

    // playerId is omitted entirely for spectators
    let anonymous = LobbyDataPayload {
        player_id: None,
        ..payload
    };
    let value = serde_json::to_value(&anonymous).unwrap();
    assert!(value.get("playerId").is_none());
}

#[test]
fn game_end_payload_shape() {
    let payload = GameEndPayload {
        players: vec![
            GameEndPlayer {
                id: "p2".into(),
                nickname: "bob".into(),
                score: 42,
                kills: 3,
            },
            GameEndPlayer {
                id: "p1".into(),
                nickname: "alice".into(),
                score: 17,
                kills: 1,
            },
        ],
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["players"][0]["score"], json!(42));
    assert_eq!(value["players"][1]["nickname"], json!("alice"));
    assert_eq!(value["players"][1]["kills"], json!(1));
}

#[test]
fn invalid_usage_frames_decode_as_the_error_packet() {
    for ctx in contexts() {
        let frame = invalid_usage("bad value", &ctx);
        let envelope = decode_packet(&frame).unwrap();
        assert_eq!(envelope.packet_type, PacketType::InvalidPacketUsageError);
        assert_eq!(envelope.payload["message"], json!("bad value"));
    }
}
