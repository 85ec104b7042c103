//! Connection manager and per-tick action admission
//!
//! [`GameServer`] is shared between the axum websocket handlers and the
//! tick task. Handlers register connections and post validated actions
//! into per-player slots; the tick task drains the slots at tick entry and
//! pushes broadcasts back through each connection's outbound queue.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::extract::ws::Message;
use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::game::snapshot::RecipientContext;
use crate::game::{GameConfig, GamePhase, PlayerAction, PlayerKind};
use crate::ws::protocol::{
    encode_packet, ActionPacket, GameEndPlayer, LobbyDataPayload, LobbyPlayer, LobbySettings,
    PacketType, SerializationContext,
};

/// Colors assigned to players in join order
const PLAYER_COLORS: [u32; 4] = [0xE7_4C3C, 0x34_98DB, 0x2E_CC71, 0xF1_C40F];

const BROADCAST_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a handshake was refused; maps onto the HTTP status of the refusal
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid join code")]
    BadJoinCode,

    #[error("player slots are full")]
    LobbyFull,

    #[error("the match has already started")]
    MatchAlreadyStarted,

    #[error("nickname is missing or empty")]
    MissingNickname,

    #[error("nickname is already taken")]
    DuplicateNickname,

    #[error("invalid query parameter: {0}")]
    InvalidQuery(&'static str),
}

impl HandshakeError {
    pub fn status(&self) -> u16 {
        match self {
            HandshakeError::BadJoinCode => 401,
            HandshakeError::LobbyFull | HandshakeError::MatchAlreadyStarted => 429,
            HandshakeError::MissingNickname
            | HandshakeError::DuplicateNickname
            | HandshakeError::InvalidQuery(_) => 400,
        }
    }
}

/// Why an inbound action was not admitted into the current tick
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("the game is not running")]
    NotRunning,

    #[error("unknown player")]
    UnknownPlayer,

    #[error("player already acted this tick")]
    AlreadyActed,

    #[error("stale game state id")]
    StaleGameState,
}

/// One registered participant slot; the DashMap entry lock is the
/// per-connection mutex guarding it.
#[derive(Debug)]
pub struct PlayerSlot {
    pub nickname: String,
    pub color: u32,
    pub kind: PlayerKind,
    pub connected: bool,
    pub quick_join: bool,
    pub pending: Option<PlayerAction>,
    pub has_acted_this_tick: bool,
}

/// A live socket registered with the server
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub kind: ConnectionKind,
    pub tx: mpsc::Sender<Message>,
    pub ctx: SerializationContext,
}

#[derive(Debug, Clone)]
pub enum ConnectionKind {
    Player(String),
    Spectator,
}

/// Snapshot of a connection used by the broadcast fan-out
pub struct BroadcastTarget {
    pub conn_id: Uuid,
    pub recipient: RecipientContext,
    pub tx: mpsc::Sender<Message>,
    pub ctx: SerializationContext,
}

/// Result of a successful player handshake
#[derive(Debug, Clone)]
pub struct PlayerRegistration {
    pub player_id: String,
    pub color: u32,
}

/// Lobby roster entry handed to the match at start
#[derive(Debug, Clone)]
pub struct LobbyEntry {
    pub id: String,
    pub nickname: String,
    pub color: u32,
    pub kind: PlayerKind,
}

pub struct GameServer {
    game_config: GameConfig,
    join_code: Option<String>,
    connections: DashMap<Uuid, ConnectionHandle>,
    slots: DashMap<String, PlayerSlot>,
    join_order: Mutex<Vec<String>>,
    phase: RwLock<GamePhase>,
    current_state_id: RwLock<String>,
    /// `Some(ids)` when every alive player is a bot; the eager gate fires
    /// once each listed player has acted on the current state.
    eager_candidates: RwLock<Option<Vec<String>>>,
    eager_notify: Notify,
    start_notify: Notify,
    shutdown_notify: Notify,
    final_ranking: RwLock<Option<Vec<GameEndPlayer>>>,
    player_id_rng: Mutex<ChaCha8Rng>,
}

impl GameServer {
    pub fn new(game_config: GameConfig, join_code: Option<String>) -> Self {
        let mut player_id_rng = ChaCha8Rng::seed_from_u64(game_config.seed);
        player_id_rng.set_stream(3);
        Self {
            game_config,
            join_code,
            connections: DashMap::new(),
            slots: DashMap::new(),
            join_order: Mutex::new(Vec::new()),
            phase: RwLock::new(GamePhase::Lobby),
            current_state_id: RwLock::new(String::new()),
            eager_candidates: RwLock::new(None),
            eager_notify: Notify::new(),
            start_notify: Notify::new(),
            shutdown_notify: Notify::new(),
            final_ranking: RwLock::new(None),
            player_id_rng: Mutex::new(player_id_rng),
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    pub fn verify_join_code(&self, provided: Option<&str>) -> bool {
        match &self.join_code {
            None => true,
            Some(code) => provided == Some(code.as_str()),
        }
    }

    /// Register a player slot. Fails when the lobby is full, the nickname
    /// collides, or the match already runs outside sandbox mode.
    pub fn register_player(
        &self,
        nickname: &str,
        kind: PlayerKind,
        quick_join: bool,
    ) -> Result<PlayerRegistration, HandshakeError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(HandshakeError::MissingNickname);
        }
        match self.phase() {
            GamePhase::Lobby => {}
            GamePhase::Running if self.game_config.sandbox => {}
            _ => return Err(HandshakeError::MatchAlreadyStarted),
        }
        if self.slots.len() >= self.game_config.expected_players {
            return Err(HandshakeError::LobbyFull);
        }
        let taken = self
            .slots
            .iter()
            .any(|entry| entry.nickname.eq_ignore_ascii_case(nickname));
        if taken {
            return Err(HandshakeError::DuplicateNickname);
        }

        // Player ids come from a seeded stream so a replayed match with the
        // same seed and join order produces identical journals.
        let player_id = {
            let mut rng = lock(&self.player_id_rng);
            let mut bytes = [0u8; 16];
            rng.fill(&mut bytes);
            Uuid::from_bytes(bytes).to_string()
        };
        let color = {
            let order = lock(&self.join_order);
            PLAYER_COLORS[order.len() % PLAYER_COLORS.len()]
        };

        self.slots.insert(
            player_id.clone(),
            PlayerSlot {
                nickname: nickname.to_string(),
                color,
                kind,
                connected: true,
                quick_join,
                pending: None,
                has_acted_this_tick: false,
            },
        );
        lock(&self.join_order).push(player_id.clone());

        if self.start_condition_met() {
            self.start_notify.notify_one();
        }

        Ok(PlayerRegistration { player_id, color })
    }

    fn start_condition_met(&self) -> bool {
        if self.phase() != GamePhase::Lobby {
            return false;
        }
        let count = self.slots.len();
        if count == 0 {
            return false;
        }
        count >= self.game_config.expected_players
            || self.game_config.sandbox
            || self.slots.iter().any(|s| s.quick_join)
    }

    /// Block until the lobby is ready to start the match
    pub async fn wait_for_start(&self) {
        loop {
            if self.start_condition_met() {
                return;
            }
            self.start_notify.notified().await;
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn add_connection(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id, handle);
    }

    /// Tear down a closed socket. A player dropping in the lobby frees the
    /// slot; dropping mid-match retires the player into the
    /// disconnected-in-game list via the tick task's liveness sweep.
    pub fn connection_closed(&self, conn_id: &Uuid) {
        let Some((_, handle)) = self.connections.remove(conn_id) else {
            return;
        };
        let ConnectionKind::Player(player_id) = handle.kind else {
            return;
        };
        match self.phase() {
            GamePhase::Lobby => {
                self.slots.remove(&player_id);
                lock(&self.join_order).retain(|id| *id != player_id);
            }
            _ => {
                if let Some(mut slot) = self.slots.get_mut(&player_id) {
                    slot.connected = false;
                }
            }
        }
    }

    pub fn close_connection(&self, conn_id: &Uuid) {
        if let Some((_, handle)) = self.connections.remove(conn_id) {
            let _ = handle.tx.try_send(Message::Close(None));
            if let ConnectionKind::Player(player_id) = handle.kind {
                if let Some(mut slot) = self.slots.get_mut(&player_id) {
                    slot.connected = false;
                }
            }
        }
    }

    pub fn close_all_connections(&self) {
        let ids: Vec<Uuid> = self.connections.iter().map(|c| c.id).collect();
        for id in ids {
            if let Some((_, handle)) = self.connections.remove(&id) {
                let _ = handle.tx.try_send(Message::Close(None));
            }
        }
    }

    pub fn connection_targets(&self) -> Vec<BroadcastTarget> {
        self.connections
            .iter()
            .map(|entry| BroadcastTarget {
                conn_id: entry.id,
                recipient: match &entry.kind {
                    ConnectionKind::Player(id) => RecipientContext::Player(id.clone()),
                    ConnectionKind::Spectator => RecipientContext::Spectator,
                },
                tx: entry.tx.clone(),
                ctx: entry.ctx,
            })
            .collect()
    }

    pub fn connected_player_ids(&self) -> HashSet<String> {
        self.slots
            .iter()
            .filter(|entry| entry.connected)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.slots.len()
    }

    pub fn spectator_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| matches!(c.kind, ConnectionKind::Spectator))
            .count()
    }

    // ------------------------------------------------------------------
    // Action admission
    // ------------------------------------------------------------------

    /// Admit one action into the current tick. Validation order: game
    /// running, one action per tick, then game-state id freshness.
    pub fn submit_action(&self, player_id: &str, packet: ActionPacket) -> Result<(), ActionError> {
        if self.phase() != GamePhase::Running {
            return Err(ActionError::NotRunning);
        }
        {
            let mut slot = self
                .slots
                .get_mut(player_id)
                .ok_or(ActionError::UnknownPlayer)?;
            if slot.has_acted_this_tick {
                return Err(ActionError::AlreadyActed);
            }
            if let Some(echoed) = &packet.game_state_id {
                if *echoed != *read(&self.current_state_id) {
                    return Err(ActionError::StaleGameState);
                }
            }
            slot.pending = Some(packet.action);
            slot.has_acted_this_tick = true;
        }
        if self.eager_ready() {
            self.eager_notify.notify_one();
        }
        Ok(())
    }

    /// Take all admitted actions. The acted-this-tick flags stay set until
    /// [`begin_new_tick`](Self::begin_new_tick) so late duplicates within
    /// the same tick are still rejected.
    pub fn drain_actions(&self) -> Vec<(String, PlayerAction)> {
        let mut actions = Vec::new();
        for mut entry in self.slots.iter_mut() {
            if let Some(action) = entry.pending.take() {
                actions.push((entry.key().clone(), action));
            }
        }
        actions
    }

    /// Reset per-tick admission state and publish the id of the snapshot
    /// about to be broadcast. Flags clear before the id flips so an action
    /// echoing the old id can only be rejected as stale, never lost.
    pub fn begin_new_tick(&self, state_id: String, eager_candidates: Option<Vec<String>>) {
        for mut entry in self.slots.iter_mut() {
            entry.has_acted_this_tick = false;
            entry.pending = None;
        }
        *write(&self.eager_candidates) = eager_candidates;
        *write(&self.current_state_id) = state_id;
    }

    pub fn current_state_id(&self) -> String {
        read(&self.current_state_id).clone()
    }

    /// True when every alive bot has acted on the current state
    pub fn eager_ready(&self) -> bool {
        let candidates = read(&self.eager_candidates);
        match &*candidates {
            Some(ids) if !ids.is_empty() => ids.iter().all(|id| {
                self.slots
                    .get(id)
                    .map(|slot| slot.has_acted_this_tick)
                    .unwrap_or(false)
            }),
            _ => false,
        }
    }

    pub async fn eager_wakeup(&self) {
        self.eager_notify.notified().await;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn phase(&self) -> GamePhase {
        *read(&self.phase)
    }

    pub fn set_phase(&self, phase: GamePhase) {
        *write(&self.phase) = phase;
    }

    pub fn set_final_ranking(&self, ranking: Vec<GameEndPlayer>) {
        *write(&self.final_ranking) = Some(ranking);
    }

    pub fn final_ranking(&self) -> Option<Vec<GameEndPlayer>> {
        read(&self.final_ranking).clone()
    }

    pub fn signal_shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    pub async fn wait_shutdown(&self) {
        self.shutdown_notify.notified().await;
    }

    // ------------------------------------------------------------------
    // Lobby data
    // ------------------------------------------------------------------

    pub fn lobby_players(&self) -> Vec<LobbyEntry> {
        let order = lock(&self.join_order).clone();
        order
            .into_iter()
            .filter_map(|id| {
                self.slots.get(&id).map(|slot| LobbyEntry {
                    id: id.clone(),
                    nickname: slot.nickname.clone(),
                    color: slot.color,
                    kind: slot.kind,
                })
            })
            .collect()
    }

    pub fn lobby_data(&self, player_id: Option<&str>) -> LobbyDataPayload {
        let players = self
            .lobby_players()
            .into_iter()
            .map(|entry| LobbyPlayer {
                id: entry.id,
                nickname: entry.nickname,
                color: entry.color,
            })
            .collect();
        LobbyDataPayload {
            player_id: player_id.map(str::to_owned),
            players,
            settings: LobbySettings {
                grid_dimension: self.game_config.grid_dim,
                number_of_players: self.game_config.expected_players,
                seed: self.game_config.seed,
                broadcast_interval: self.game_config.broadcast_interval.as_millis() as u64,
                ticks: self.game_config.max_ticks,
                sandbox: self.game_config.sandbox,
                eager_broadcast: self.game_config.eager_broadcast,
            },
        }
    }

    /// Push a refreshed lobby roster to every open connection; players get
    /// their own id stamped into the payload.
    pub async fn broadcast_lobby_refresh(&self) {
        for target in self.connection_targets() {
            let player_id = match &target.recipient {
                RecipientContext::Player(id) => Some(id.as_str()),
                RecipientContext::Spectator => None,
            };
            let payload = self.lobby_data(player_id);
            match serde_json::to_value(&payload) {
                Ok(value) => {
                    self.send_to(&target, PacketType::LobbyData, value).await;
                }
                Err(e) => debug!(error = %e, "failed to serialize lobby data"),
            }
        }
    }

    /// Send the same payload to every open connection (enum-free payloads
    /// only; the envelope `type` is still encoded per connection).
    pub async fn broadcast_payload(&self, packet_type: PacketType, payload: serde_json::Value) {
        for target in self.connection_targets() {
            self.send_to(&target, packet_type, payload.clone()).await;
        }
    }

    async fn send_to(
        &self,
        target: &BroadcastTarget,
        packet_type: PacketType,
        payload: serde_json::Value,
    ) {
        let Ok(frame) = encode_packet(packet_type, payload, &target.ctx) else {
            return;
        };
        let send = target.tx.send(Message::Text(frame));
        if !matches!(
            tokio::time::timeout(BROADCAST_SEND_TIMEOUT, send).await,
            Ok(Ok(()))
        ) {
            debug!(conn_id = %target.conn_id, "dropping unresponsive connection");
            self.close_connection(&target.conn_id);
        }
    }
}

// Poisoned locks only happen after a panic on another thread; recovering
// the inner value keeps the server shutting down cleanly instead of
// cascading panics across tasks.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
