//! WebSocket protocol message definitions
//! These are the wire types for client-server communication
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": {...}}`. Enum
//! values are written either as integer ordinals or as lower-camel-case
//! strings depending on the format negotiated at handshake; decoding
//! accepts both forms regardless of the negotiated one.

use serde::Serialize;
use serde_json::{json, Value};

use crate::game::combat::LaserOrientation;
use crate::game::grid::{Direction, Rotation};
use crate::game::tank::SecondaryItem;

/// Enum wire representation negotiated per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumFormat {
    Int,
    #[default]
    Name,
}

impl EnumFormat {
    /// Parse the `enumSerializationFormat` handshake query value
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "int" => Some(EnumFormat::Int),
            "string" => Some(EnumFormat::Name),
            _ => None,
        }
    }
}

/// Per-connection serialization settings, fixed at handshake
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializationContext {
    pub format: EnumFormat,
}

/// An enum with a stable ordinal and wire name for every variant
pub trait WireEnum: Sized + Copy + PartialEq + 'static {
    const NAMES: &'static [&'static str];
    const VALUES: &'static [Self];

    fn ordinal(self) -> usize {
        Self::VALUES
            .iter()
            .position(|v| *v == self)
            .unwrap_or_default()
    }

    fn name(self) -> &'static str {
        Self::NAMES[self.ordinal()]
    }

    fn encode(self, ctx: &SerializationContext) -> Value {
        match ctx.format {
            EnumFormat::Int => Value::from(self.ordinal()),
            EnumFormat::Name => Value::from(self.name()),
        }
    }

    /// Accepts both the ordinal and the name form
    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                let ord = n.as_u64()? as usize;
                Self::VALUES.get(ord).copied()
            }
            Value::String(s) => Self::NAMES
                .iter()
                .position(|name| name == s)
                .map(|ord| Self::VALUES[ord]),
            _ => None,
        }
    }
}

/// Packet kinds carried in the envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ping,
    Pong,
    GameStart,
    GameNotStarted,
    GameStarting,
    GameInProgress,
    GameEnded,
    LobbyData,
    GameState,
    GameEnd,
    Movement,
    Rotation,
    AbilityUse,
    InvalidPacketUsageError,
}

impl WireEnum for PacketType {
    const NAMES: &'static [&'static str] = &[
        "ping",
        "pong",
        "gameStart",
        "gameNotStarted",
        "gameStarting",
        "gameInProgress",
        "gameEnded",
        "lobbyData",
        "gameState",
        "gameEnd",
        "movement",
        "rotation",
        "abilityUse",
        "invalidPacketUsageError",
    ];
    const VALUES: &'static [Self] = &[
        PacketType::Ping,
        PacketType::Pong,
        PacketType::GameStart,
        PacketType::GameNotStarted,
        PacketType::GameStarting,
        PacketType::GameInProgress,
        PacketType::GameEnded,
        PacketType::LobbyData,
        PacketType::GameState,
        PacketType::GameEnd,
        PacketType::Movement,
        PacketType::Rotation,
        PacketType::AbilityUse,
        PacketType::InvalidPacketUsageError,
    ];
}

impl WireEnum for Direction {
    const NAMES: &'static [&'static str] = &["up", "right", "down", "left"];
    const VALUES: &'static [Self] = &[
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];
}

impl WireEnum for Rotation {
    const NAMES: &'static [&'static str] = &["left", "right"];
    const VALUES: &'static [Self] = &[Rotation::Left, Rotation::Right];
}

impl WireEnum for SecondaryItem {
    const NAMES: &'static [&'static str] = &["laser", "doubleBullet", "radar", "mine"];
    const VALUES: &'static [Self] = &[
        SecondaryItem::Laser,
        SecondaryItem::DoubleBullet,
        SecondaryItem::Radar,
        SecondaryItem::Mine,
    ];
}

impl WireEnum for LaserOrientation {
    const NAMES: &'static [&'static str] = &["horizontal", "vertical"];
    const VALUES: &'static [Self] = &[LaserOrientation::Horizontal, LaserOrientation::Vertical];
}

/// Movement action direction relative to the hull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Forward,
    Backward,
}

impl WireEnum for MoveDirection {
    const NAMES: &'static [&'static str] = &["forward", "backward"];
    const VALUES: &'static [Self] = &[MoveDirection::Forward, MoveDirection::Backward];
}

/// Kind of ability requested by an `AbilityUse` packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbilityType {
    FireBullet,
    FireDoubleBullet,
    UseLaser,
    DropMine,
    UseRadar,
}

impl WireEnum for AbilityType {
    const NAMES: &'static [&'static str] = &[
        "fireBullet",
        "fireDoubleBullet",
        "useLaser",
        "dropMine",
        "useRadar",
    ];
    const VALUES: &'static [Self] = &[
        AbilityType::FireBullet,
        AbilityType::FireDoubleBullet,
        AbilityType::UseLaser,
        AbilityType::DropMine,
        AbilityType::UseRadar,
    ];
}

/// Discriminator for entries in the per-tile entity lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Wall,
    Tank,
    Bullet,
    Laser,
    Mine,
    Item,
}

impl WireEnum for TileKind {
    const NAMES: &'static [&'static str] = &["wall", "tank", "bullet", "laser", "mine", "item"];
    const VALUES: &'static [Self] = &[
        TileKind::Wall,
        TileKind::Tank,
        TileKind::Bullet,
        TileKind::Laser,
        TileKind::Mine,
        TileKind::Item,
    ];
}

/// Zone capture state discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStatusKind {
    Neutral,
    BeingCaptured,
    Captured,
    BeingContested,
    BeingRetaken,
}

impl WireEnum for ZoneStatusKind {
    const NAMES: &'static [&'static str] = &[
        "neutral",
        "beingCaptured",
        "captured",
        "beingContested",
        "beingRetaken",
    ];
    const VALUES: &'static [Self] = &[
        ZoneStatusKind::Neutral,
        ZoneStatusKind::BeingCaptured,
        ZoneStatusKind::Captured,
        ZoneStatusKind::BeingContested,
        ZoneStatusKind::BeingRetaken,
    ];
}

/// Errors produced while decoding an inbound frame
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("packet is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unknown packet type")]
    UnknownPacketType,

    #[error("invalid value for `{0}`")]
    InvalidEnumValue(&'static str),
}

/// A decoded inbound frame: its kind plus the raw payload object
#[derive(Debug, Clone)]
pub struct Envelope {
    pub packet_type: PacketType,
    pub payload: Value,
}

/// Encode an outbound packet as a text frame
pub fn encode_packet(
    packet_type: PacketType,
    payload: Value,
    ctx: &SerializationContext,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&json!({
        "type": packet_type.encode(ctx),
        "payload": payload,
    }))
}

/// Decode an inbound text frame into its envelope
pub fn decode_packet(text: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let type_value = obj.get("type").ok_or(DecodeError::MissingField("type"))?;
    let packet_type = PacketType::decode(type_value).ok_or(DecodeError::UnknownPacketType)?;
    let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
    Ok(Envelope {
        packet_type,
        payload,
    })
}

/// A validated client action, paired with the echoed game-state id
#[derive(Debug, Clone)]
pub struct ActionPacket {
    pub action: crate::game::PlayerAction,
    pub game_state_id: Option<String>,
}

/// Parse `Movement`, `Rotation`, and `AbilityUse` payloads
pub fn parse_action(envelope: &Envelope) -> Result<ActionPacket, DecodeError> {
    use crate::game::PlayerAction;

    let obj = envelope
        .payload
        .as_object()
        .ok_or(DecodeError::NotAnObject)?;
    let game_state_id = obj
        .get("gameStateId")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let action = match envelope.packet_type {
        PacketType::Movement => {
            let direction = obj
                .get("direction")
                .ok_or(DecodeError::MissingField("direction"))?;
            let direction = MoveDirection::decode(direction)
                .ok_or(DecodeError::InvalidEnumValue("direction"))?;
            PlayerAction::Move(direction)
        }
        PacketType::Rotation => {
            let tank = decode_optional_enum::<Rotation>(obj.get("tankRotation"), "tankRotation")?;
            let turret =
                decode_optional_enum::<Rotation>(obj.get("turretRotation"), "turretRotation")?;
            PlayerAction::Rotate { tank, turret }
        }
        PacketType::AbilityUse => {
            let ability = obj
                .get("abilityType")
                .ok_or(DecodeError::MissingField("abilityType"))?;
            let ability =
                AbilityType::decode(ability).ok_or(DecodeError::InvalidEnumValue("abilityType"))?;
            PlayerAction::Ability(ability)
        }
        _ => return Err(DecodeError::UnknownPacketType),
    };

    Ok(ActionPacket {
        action,
        game_state_id,
    })
}

fn decode_optional_enum<E: WireEnum>(
    value: Option<&Value>,
    field: &'static str,
) -> Result<Option<E>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => E::decode(v)
            .map(Some)
            .ok_or(DecodeError::InvalidEnumValue(field)),
    }
}

// ============================================================================
// Outbound payloads without format-dependent fields
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: String,
    pub nickname: String,
    pub color: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettings {
    pub grid_dimension: usize,
    pub number_of_players: usize,
    pub seed: u64,
    /// Milliseconds between broadcasts
    pub broadcast_interval: u64,
    pub ticks: u64,
    pub sandbox: bool,
    pub eager_broadcast: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyDataPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub players: Vec<LobbyPlayer>,
    pub settings: LobbySettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndPlayer {
    pub id: String,
    pub nickname: String,
    pub score: u64,
    pub kills: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndPayload {
    pub players: Vec<GameEndPlayer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

/// Build an `InvalidPacketUsageError` frame
pub fn invalid_usage(message: impl Into<String>, ctx: &SerializationContext) -> String {
    let payload = ErrorPayload {
        message: message.into(),
    };
    // ErrorPayload serialization cannot fail
    encode_packet(
        PacketType::InvalidPacketUsageError,
        serde_json::to_value(payload).unwrap_or(Value::Null),
        ctx,
    )
    .unwrap_or_default()
}
