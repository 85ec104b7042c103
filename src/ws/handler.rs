//! WebSocket upgrade handlers and per-connection sessions
//!
//! Handshake validation runs before the upgrade so refusals surface as
//! plain HTTP statuses: 401 for a bad join code, 429 when the player slots
//! are full, 400 for malformed parameters. After the upgrade each
//! connection gets a reader loop (frames in, actions admitted) and a
//! writer task (broadcasts out) joined by an mpsc queue.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::server::{ActionError, ConnectionHandle, ConnectionKind, HandshakeError};
use crate::game::{GamePhase, PlayerKind};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{
    decode_packet, encode_packet, invalid_usage, parse_action, EnumFormat, GameEndPayload,
    PacketType, SerializationContext,
};

/// Outbound queue depth per connection; a queue that stays full marks the
/// connection as failed during fan-out.
const OUTBOUND_QUEUE: usize = 64;

/// Query parameters for a player handshake
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerQuery {
    pub join_code: Option<String>,
    pub nickname: Option<String>,
    #[serde(rename = "type")]
    pub player_type: Option<String>,
    pub enum_serialization_format: Option<String>,
    pub quick_join: Option<bool>,
}

/// Query parameters for a spectator handshake
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatorQuery {
    pub join_code: Option<String>,
    pub enum_serialization_format: Option<String>,
}

/// `GET /` — player upgrade
pub async fn ws_player_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<PlayerQuery>,
    State(state): State<AppState>,
) -> Response {
    if !state.server.verify_join_code(query.join_code.as_deref()) {
        return refuse(HandshakeError::BadJoinCode);
    }
    let ctx = match parse_format(query.enum_serialization_format.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => return refuse(e),
    };
    let kind = match query.player_type.as_deref() {
        None => PlayerKind::Human,
        Some(value) => match PlayerKind::from_query(value) {
            Some(kind) => kind,
            None => return refuse(HandshakeError::InvalidQuery("type")),
        },
    };
    let nickname = query.nickname.unwrap_or_default();
    let quick_join = query.quick_join.unwrap_or(false);

    match state.server.register_player(&nickname, kind, quick_join) {
        Ok(registration) => {
            info!(
                player_id = %registration.player_id,
                nickname = %nickname.trim(),
                ?kind,
                "player handshake accepted"
            );
            ws.on_upgrade(move |socket| {
                handle_socket(
                    socket,
                    state,
                    ConnectionKind::Player(registration.player_id),
                    ctx,
                )
            })
        }
        Err(e) => refuse(e),
    }
}

/// `GET /spectator` — spectator upgrade
pub async fn ws_spectator_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SpectatorQuery>,
    State(state): State<AppState>,
) -> Response {
    if !state.server.verify_join_code(query.join_code.as_deref()) {
        return refuse(HandshakeError::BadJoinCode);
    }
    let ctx = match parse_format(query.enum_serialization_format.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => return refuse(e),
    };
    info!("spectator handshake accepted");
    ws.on_upgrade(move |socket| handle_socket(socket, state, ConnectionKind::Spectator, ctx))
}

fn parse_format(value: Option<&str>) -> Result<SerializationContext, HandshakeError> {
    let format = match value {
        None => EnumFormat::default(),
        Some(raw) => EnumFormat::from_query(raw)
            .ok_or(HandshakeError::InvalidQuery("enumSerializationFormat"))?,
    };
    Ok(SerializationContext { format })
}

fn refuse(error: HandshakeError) -> Response {
    warn!(error = %error, "handshake refused");
    Response::builder()
        .status(error.status())
        .body(error.to_string().into())
        .unwrap_or_default()
}

/// Handle the upgraded connection until either side closes it
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    kind: ConnectionKind,
    ctx: SerializationContext,
) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    state.server.add_connection(ConnectionHandle {
        id: conn_id,
        kind: kind.clone(),
        tx: tx.clone(),
        ctx,
    });

    // Writer task: outbound queue -> socket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sink.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    greet(&state, &kind, &ctx, &tx).await;
    if matches!(kind, ConnectionKind::Player(_)) {
        state.server.broadcast_lobby_refresh().await;
    }

    // Reader loop: socket -> dispatcher
    let rate_limiter = ConnectionRateLimiter::for_interval(state.config.game.broadcast_interval);
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_frame() {
                    warn!(conn_id = %conn_id, "rate limited inbound frame");
                    continue;
                }
                dispatch_frame(&state, &kind, &ctx, &tx, &text).await;
            }
            Ok(Message::Binary(_)) => {
                let _ = tx
                    .send(Message::Text(invalid_usage("binary frames are not supported", &ctx)))
                    .await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "client closed the connection");
                break;
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    state.server.connection_closed(&conn_id);
    writer.abort();
    if matches!(kind, ConnectionKind::Player(_)) && state.server.phase() == GamePhase::Lobby {
        state.server.broadcast_lobby_refresh().await;
    }
    info!(conn_id = %conn_id, "connection closed");
}

/// First frames after the upgrade: the lobby roster, then the packet
/// matching the current match phase.
async fn greet(
    state: &AppState,
    kind: &ConnectionKind,
    ctx: &SerializationContext,
    tx: &mpsc::Sender<Message>,
) {
    let player_id = match kind {
        ConnectionKind::Player(id) => Some(id.as_str()),
        ConnectionKind::Spectator => None,
    };
    let lobby = state.server.lobby_data(player_id);
    if let Ok(payload) = serde_json::to_value(&lobby) {
        if let Ok(frame) = encode_packet(PacketType::LobbyData, payload, ctx) {
            let _ = tx.send(Message::Text(frame)).await;
        }
    }

    let phase_packet = match state.server.phase() {
        GamePhase::Lobby => None,
        GamePhase::Running => Some((PacketType::GameInProgress, json!({}))),
        GamePhase::Ended => {
            let ranking = state.server.final_ranking().unwrap_or_default();
            match serde_json::to_value(&GameEndPayload { players: ranking }) {
                Ok(payload) => Some((PacketType::GameEnded, payload)),
                Err(_) => None,
            }
        }
    };
    if let Some((packet_type, payload)) = phase_packet {
        if let Ok(frame) = encode_packet(packet_type, payload, ctx) {
            let _ = tx.send(Message::Text(frame)).await;
        }
    }
}

/// Decode one inbound frame and route it: control frames are answered
/// directly, actions go through admission, everything else is an error.
async fn dispatch_frame(
    state: &AppState,
    kind: &ConnectionKind,
    ctx: &SerializationContext,
    tx: &mpsc::Sender<Message>,
    text: &str,
) {
    let envelope = match decode_packet(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "undecodable frame");
            let _ = tx.send(Message::Text(invalid_usage(e.to_string(), ctx))).await;
            return;
        }
    };

    match envelope.packet_type {
        PacketType::Ping => {
            if let Ok(frame) = encode_packet(PacketType::Pong, json!({}), ctx) {
                let _ = tx.send(Message::Text(frame)).await;
            }
        }
        PacketType::Pong => {}
        PacketType::Movement | PacketType::Rotation | PacketType::AbilityUse => {
            let ConnectionKind::Player(player_id) = kind else {
                let _ = tx
                    .send(Message::Text(invalid_usage("spectators cannot act", ctx)))
                    .await;
                return;
            };
            let packet = match parse_action(&envelope) {
                Ok(packet) => packet,
                Err(e) => {
                    let _ = tx.send(Message::Text(invalid_usage(e.to_string(), ctx))).await;
                    return;
                }
            };
            match state.server.submit_action(player_id, packet) {
                Ok(()) => {}
                Err(ActionError::NotRunning) => {
                    if let Ok(frame) = encode_packet(PacketType::GameNotStarted, json!({}), ctx) {
                        let _ = tx.send(Message::Text(frame)).await;
                    }
                }
                // The player already committed this tick, or replied to an
                // outdated state: drop silently.
                Err(ActionError::AlreadyActed) | Err(ActionError::StaleGameState) => {
                    debug!(player_id = %player_id, "action dropped");
                }
                Err(e @ ActionError::UnknownPlayer) => {
                    let _ = tx.send(Message::Text(invalid_usage(e.to_string(), ctx))).await;
                }
            }
        }
        other => {
            let _ = tx
                .send(Message::Text(invalid_usage(
                    format!("unexpected packet type {:?}", other),
                    ctx,
                )))
                .await;
        }
    }
}
