//! Rooms: per-room player table, connection fan-out, message dispatch and
//! the periodic tick/snapshot loops. The transport (WebSocket, in-process
//! test harness, anything) implements [`Connection`] and feeds inbound
//! frames through [`dispatch`].

use nalgebra::Point3;
use rand::{rngs::SmallRng, FromEntropy, Rng};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use serde_derive::Serialize;
use terravox_common::{
    build::MAX_BUILD_DISTANCE,
    material::MaterialRegistry,
    net::{
        frame::quantize_cm,
        packet::{id as packet_id, SurfaceColumnChunk},
        ClientPacket, PlayerSnapshot, ServerPacket,
    },
    prelude::*,
};

use crate::{
    build::{handle_build_intent, BuildRequest, BuildState},
    provider::ChunkProvider,
    rate_limit::RateLimiter,
    store::{ChunkStore, TileStore},
    surface::TileProvider,
};

pub const PROTOCOL_VERSION: u8 = 1;
pub const ROOM_MAX_PLAYERS: usize = 64;
pub const ROOM_LIMIT: usize = 16;

/// ERROR frame code for a protocol-version mismatch; build rejections use
/// [`BuildResult::code`][terravox_common::build::BuildResult::code] (0..=5).
pub const ERROR_BAD_PROTOCOL: u8 = 0xff;

/// Outgoing half of a client connection. Send never blocks the room loop;
/// transports queue internally.
pub trait Connection {
    fn send(&self, frame: Vec<u8>);
}

/// Channel senders are connections out of the box, which is what most
/// transports (and the tests) want.
impl Connection for crossbeam_channel::Sender<Vec<u8>> {
    fn send(&self, frame: Vec<u8>) {
        if let Err(err) = self.try_send(frame) {
            log::debug!("dropping frame for a gone connection: {}", err);
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerState {
    pub id: u16,
    pub position: Point3<f32>,
    pub yaw_q: i16,
    pub pitch_q: i16,
    pub buttons: u8,
    pub flags: u8,
    pub last_input_seq: u16,
}

impl PlayerState {
    fn new(id: u16) -> Self {
        Self {
            id,
            position: point![0.0, 0.0, 0.0],
            yaw_q: 0,
            pitch_q: 0,
            buttons: 0,
            flags: 0,
            last_input_seq: 0,
        }
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            x_q: quantize_cm(self.position.x),
            y_q: quantize_cm(self.position.y),
            z_q: quantize_cm(self.position.z),
            yaw_q: self.yaw_q,
            pitch_q: self.pitch_q,
            buttons: self.buttons,
            flags: self.flags,
        }
    }
}

pub struct Room {
    id: String,
    registry: Arc<MaterialRegistry>,
    provider: ChunkProvider,
    tiles: TileProvider,
    limiter: RateLimiter,
    build: BuildState,
    players: HashMap<u16, PlayerState>,
    connections: HashMap<u16, Box<dyn Connection>>,
    /// chunk requests waiting on an async load/generate
    pending_chunk_sends: Vec<(u16, terravox_common::world::ChunkPos)>,
    tick: u32,
}

impl Room {
    pub fn open(id: String, data_root: &Path, registry: &Arc<MaterialRegistry>) -> Result<Room> {
        let store = ChunkStore::open(data_root.join(&id))?;
        let tiles = TileProvider::new(TileStore::new(store.root()));
        Ok(Room {
            id,
            registry: Arc::clone(registry),
            provider: ChunkProvider::new(store, registry),
            tiles,
            limiter: RateLimiter::new(std::time::Duration::from_millis(
                terravox_common::build::BUILD_MIN_INTERVAL_MS,
            )),
            build: BuildState::default(),
            players: HashMap::new(),
            connections: HashMap::new(),
            pending_chunk_sends: Vec::new(),
            tick: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn build_seq(&self) -> u32 {
        self.build.build_seq()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= ROOM_MAX_PLAYERS
    }

    pub fn contains_player(&self, player_id: u16) -> bool {
        self.players.contains_key(&player_id)
    }

    /// Reserve a slot for a player; the connection attaches separately once
    /// the transport is up.
    pub fn add_player(&mut self, player_id: u16) {
        self.players.insert(player_id, PlayerState::new(player_id));
    }

    pub fn attach_connection(&mut self, player_id: u16, connection: Box<dyn Connection>) {
        connection.send(
            ServerPacket::Welcome {
                player_id,
                room_id: self.id.clone(),
            }
            .encode(),
        );
        self.connections.insert(player_id, connection);
        self.broadcast(&ServerPacket::RoomInfo {
            player_count: self.players.len().min(u8::MAX as usize) as u8,
        });
    }

    pub fn remove_player(&mut self, player_id: u16) {
        self.players.remove(&player_id);
        self.connections.remove(&player_id);
        self.limiter.remove(&format!("{}:{}", self.id, player_id));
        self.pending_chunk_sends
            .retain(|&(waiting, _)| waiting != player_id);
        self.broadcast(&ServerPacket::RoomInfo {
            player_count: self.players.len().min(u8::MAX as usize) as u8,
        });
    }

    pub fn broadcast(&self, packet: &ServerPacket) {
        let frame = packet.encode();
        for connection in self.connections.values() {
            connection.send(frame.clone());
        }
    }

    pub fn send_to(&self, player_id: u16, packet: &ServerPacket) {
        if let Some(connection) = self.connections.get(&player_id) {
            connection.send(packet.encode());
        }
    }

    /// ~30 Hz housekeeping. Position is client-authoritative, so the tick
    /// only advances the counter and services async completions.
    pub fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.service_async();
    }

    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    /// 10 Hz: every player state serialized to everyone.
    pub fn broadcast_snapshot(&self) {
        let mut players: Vec<_> = self.players.values().map(PlayerState::snapshot).collect();
        players.sort_by_key(|snapshot| snapshot.id);
        self.broadcast(&ServerPacket::Snapshot {
            tick: self.tick,
            players,
        });
    }

    pub fn flush_stores(&mut self) -> usize {
        self.provider.store_mut().flush() + self.tiles.flush()
    }

    /// Drain async chunk completions and answer the requests that waited on
    /// them.
    fn service_async(&mut self) {
        let ready = self.provider.poll_finished();
        self.provider.store_mut().drain_loads();
        if ready.is_empty() && self.pending_chunk_sends.is_empty() {
            return;
        }

        let mut still_waiting = Vec::new();
        let pending = std::mem::take(&mut self.pending_chunk_sends);
        for (player_id, pos) in pending {
            match self.provider.get_cached(pos) {
                Some(chunk) => {
                    let packet = ServerPacket::ChunkData {
                        pos,
                        last_build_seq: chunk.last_build_seq(),
                        voxels: chunk.to_dense().to_vec(),
                    };
                    self.send_to(player_id, &packet);
                }
                None if self.provider.is_pending(pos) => still_waiting.push((player_id, pos)),
                None => {
                    // load finished without data; regenerate
                    self.provider.request(pos, false);
                    still_waiting.push((player_id, pos));
                }
            }
        }
        self.pending_chunk_sends = still_waiting;
    }

    fn on_join(&mut self, player_id: u16, protocol_version: u8) -> Result<()> {
        if protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "player {} joined with protocol {} (want {})",
                player_id,
                protocol_version,
                PROTOCOL_VERSION
            );
            self.send_to(
                player_id,
                &ServerPacket::Error {
                    code: ERROR_BAD_PROTOCOL,
                },
            );
            return Ok(());
        }
        self.send_to(
            player_id,
            &ServerPacket::RoomInfo {
                player_count: self.players.len().min(u8::MAX as usize) as u8,
            },
        );
        Ok(())
    }

    fn on_input(
        &mut self,
        player_id: u16,
        buttons: u8,
        yaw_q: i16,
        pitch_q: i16,
        seq: u16,
        position: Point3<f32>,
    ) -> Result<()> {
        let player = match self.players.get_mut(&player_id) {
            Some(player) => player,
            None => bail!("input from unknown player {}", player_id),
        };
        // inputs may arrive out of order; the newest sequence wins
        if seq.wrapping_sub(player.last_input_seq) > u16::MAX / 2 {
            return Ok(());
        }
        player.last_input_seq = seq;
        // low five bits are action buttons, the top three are the client's
        // state flags (grounded / sprinting / building)
        player.buttons = buttons & 0x1f;
        player.flags = buttons >> 5;
        player.yaw_q = yaw_q;
        player.pitch_q = pitch_q;
        player.position = position;
        Ok(())
    }

    fn on_build_intent(&mut self, player_id: u16, now: Instant, op: &terravox_common::build::BuildOperation) -> Result<()> {
        let player_pos = match self.players.get(&player_id) {
            Some(player) => player.position,
            None => bail!("build intent from unknown player {}", player_id),
        };

        let result = handle_build_intent(
            &mut self.provider,
            &mut self.tiles,
            &mut self.limiter,
            &mut self.build,
            &self.registry,
            BuildRequest {
                room_id: &self.id,
                player_id,
                player_pos,
                op,
                now,
            },
        );

        if result.is_success() {
            self.broadcast(&ServerPacket::BuildCommit {
                build_seq: self.build.build_seq(),
                player_id,
                op: op.clone(),
            });
        } else {
            self.send_to(
                player_id,
                &ServerPacket::Error {
                    code: result.code(),
                },
            );
        }
        Ok(())
    }

    fn on_chunk_request(&mut self, player_id: u16, pos: terravox_common::world::ChunkPos) -> Result<()> {
        if let Some(chunk) = self.provider.get_cached(pos) {
            let packet = ServerPacket::ChunkData {
                pos,
                last_build_seq: chunk.last_build_seq(),
                voxels: chunk.to_dense().to_vec(),
            };
            self.send_to(player_id, &packet);
            return Ok(());
        }

        // fire and forget: the async pipeline answers when the chunk lands
        self.provider.request(pos, false);
        self.pending_chunk_sends.push((player_id, pos));
        Ok(())
    }

    fn on_map_tile_request(&mut self, player_id: u16, pos: terravox_common::world::TilePos) -> Result<()> {
        let tile = self.tiles.get_or_create(&self.provider, pos);
        let packet = ServerPacket::tile_data(tile);
        self.send_to(player_id, &packet);
        Ok(())
    }

    fn on_surface_column_request(
        &mut self,
        player_id: u16,
        pos: terravox_common::world::TilePos,
    ) -> Result<()> {
        let column = self.tiles.surface_column(&mut self.provider, pos);
        let chunks = column
            .chunks
            .iter()
            .map(|&chunk_pos| {
                let chunk = self
                    .provider
                    .get_cached(chunk_pos)
                    .expect("surface column chunks are cached");
                SurfaceColumnChunk {
                    cy: chunk_pos.y,
                    last_build_seq: chunk.last_build_seq(),
                    voxels: chunk.to_dense().to_vec(),
                }
            })
            .collect();

        let packet = ServerPacket::SurfaceColumnData {
            pos,
            heights: column.tile.heights().to_vec(),
            materials: column.tile.materials().to_vec(),
            chunks,
        };
        self.send_to(player_id, &packet);
        Ok(())
    }

    fn on_build_sync_request(&mut self, player_id: u16, since_seq: u32) -> Result<()> {
        let entries: Vec<_> = self
            .build
            .entries_since(since_seq)
            .map(|entry| (entry.player_id, entry.op.clone()))
            .collect();
        let packet = ServerPacket::BuildSync {
            start_seq: since_seq.saturating_add(1),
            entries,
        };
        self.send_to(player_id, &packet);
        Ok(())
    }

    fn on_ping(&mut self, player_id: u16, timestamp: u32) -> Result<()> {
        self.send_to(player_id, &ServerPacket::Pong { timestamp });
        Ok(())
    }
}

type Handler = fn(&mut Room, u16, Instant, ClientPacket) -> Result<()>;

/// Frame id to handler map; ids absent from the map are logged and
/// dropped before any payload decoding happens.
pub struct MessageRegistry {
    handlers: HashMap<u8, Handler>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl MessageRegistry {
    pub fn standard() -> MessageRegistry {
        let mut handlers: HashMap<u8, Handler> = HashMap::new();

        handlers.insert(packet_id::JOIN, |room, player, _, packet| {
            match packet {
                ClientPacket::Join {
                    protocol_version, ..
                } => room.on_join(player, protocol_version),
                _ => unreachable!(),
            }
        });
        handlers.insert(packet_id::INPUT, |room, player, _, packet| match packet {
            ClientPacket::Input {
                buttons,
                yaw_q,
                pitch_q,
                seq,
                position,
            } => room.on_input(player, buttons, yaw_q, pitch_q, seq, position),
            _ => unreachable!(),
        });
        handlers.insert(packet_id::PING, |room, player, _, packet| match packet {
            ClientPacket::Ping { timestamp } => room.on_ping(player, timestamp),
            _ => unreachable!(),
        });
        handlers.insert(
            packet_id::BUILD_INTENT,
            |room, player, now, packet| match packet {
                ClientPacket::BuildIntent(op) => room.on_build_intent(player, now, &op),
                _ => unreachable!(),
            },
        );
        handlers.insert(
            packet_id::CHUNK_REQUEST,
            |room, player, _, packet| match packet {
                ClientPacket::ChunkRequest(pos) => room.on_chunk_request(player, pos),
                _ => unreachable!(),
            },
        );
        handlers.insert(
            packet_id::MAP_TILE_REQUEST,
            |room, player, _, packet| match packet {
                ClientPacket::MapTileRequest(pos) => room.on_map_tile_request(player, pos),
                _ => unreachable!(),
            },
        );
        handlers.insert(
            packet_id::SURFACE_COLUMN_REQUEST,
            |room, player, _, packet| match packet {
                ClientPacket::SurfaceColumnRequest(pos) => {
                    room.on_surface_column_request(player, pos)
                }
                _ => unreachable!(),
            },
        );
        handlers.insert(
            packet_id::BUILD_SYNC_REQUEST,
            |room, player, _, packet| match packet {
                ClientPacket::BuildSyncRequest { since_seq } => {
                    room.on_build_sync_request(player, since_seq)
                }
                _ => unreachable!(),
            },
        );

        MessageRegistry { handlers }
    }

    pub fn get(&self, id: u8) -> Option<&Handler> {
        self.handlers.get(&id)
    }
}

/// Entry point for inbound frames. Protocol errors never propagate: they
/// are logged and the frame is dropped.
pub fn dispatch(
    registry: &MessageRegistry,
    room: &mut Room,
    player_id: u16,
    now: Instant,
    frame: &[u8],
) {
    let frame_id = match frame.first() {
        Some(&id) => id,
        None => {
            log::warn!("empty frame from player {}", player_id);
            return;
        }
    };

    let handler = match registry.get(frame_id) {
        Some(handler) => handler,
        None => {
            log::warn!(
                "unknown message id {:#04x} from player {}, dropping",
                frame_id,
                player_id
            );
            return;
        }
    };

    let packet = match ClientPacket::decode(frame) {
        Ok(packet) => packet,
        Err(err) => {
            log::warn!("bad frame from player {}: {}", player_id, err);
            return;
        }
    };

    if let Err(err) = handler(room, player_id, now, packet) {
        log::warn!("handler for id {:#04x} failed: {}", frame_id, err);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub player_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthSummary {
    pub room_count: usize,
    pub player_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinTicket {
    pub room_id: String,
    pub player_id: u16,
    pub token: String,
    pub protocol_version: u8,
}

#[derive(Debug)]
pub enum JoinError {
    VersionMismatch { wanted: u8 },
    ServerFull,
}

impl std::error::Error for JoinError {}
impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinError::VersionMismatch { wanted } => {
                write!(f, "protocol version mismatch, server speaks {}", wanted)
            }
            JoinError::ServerFull => write!(f, "all rooms are full"),
        }
    }
}

/// Owns every room and implements the join flow the HTTP onboarding layer
/// fronts: first room with space wins, a new room opens when all are full.
pub struct RoomManager {
    rooms: Vec<Room>,
    data_root: PathBuf,
    registry: Arc<MaterialRegistry>,
    next_player_id: u16,
    token_rng: SmallRng,
}

impl RoomManager {
    pub fn new<P: AsRef<Path>>(data_root: P, registry: Arc<MaterialRegistry>) -> Self {
        Self {
            rooms: Vec::new(),
            data_root: data_root.as_ref().to_owned(),
            registry,
            next_player_id: 1,
            token_rng: SmallRng::from_entropy(),
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn rooms_mut(&mut self) -> &mut [Room] {
        &mut self.rooms
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|room| room.id() == room_id)
    }

    pub fn join(&mut self, protocol_version: u8) -> Result<JoinTicket, JoinError> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(JoinError::VersionMismatch {
                wanted: PROTOCOL_VERSION,
            });
        }

        let room_index = match self.rooms.iter().position(|room| !room.is_full()) {
            Some(index) => index,
            None => {
                if self.rooms.len() >= ROOM_LIMIT {
                    return Err(JoinError::ServerFull);
                }
                let id = format!("room-{}", self.rooms.len());
                match Room::open(id.clone(), &self.data_root, &self.registry) {
                    Ok(room) => {
                        log::info!("opened {}", id);
                        self.rooms.push(room);
                        self.rooms.len() - 1
                    }
                    Err(err) => {
                        log::error!("failed to open {}: {}", id, err);
                        return Err(JoinError::ServerFull);
                    }
                }
            }
        };

        let player_id = self.next_player_id;
        self.next_player_id = self.next_player_id.wrapping_add(1).max(1);

        let room = &mut self.rooms[room_index];
        room.add_player(player_id);

        Ok(JoinTicket {
            room_id: room.id().to_owned(),
            player_id,
            token: format!("{}:{}:{:08x}", room.id(), player_id, self.token_rng.gen::<u32>()),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    pub fn list(&self) -> Vec<RoomSummary> {
        self.rooms
            .iter()
            .map(|room| RoomSummary {
                id: room.id().to_owned(),
                player_count: room.player_count(),
            })
            .collect()
    }

    pub fn health(&self) -> HealthSummary {
        HealthSummary {
            room_count: self.rooms.len(),
            player_count: self.rooms.iter().map(Room::player_count).sum(),
        }
    }

    pub fn tick_all(&mut self) {
        for room in self.rooms.iter_mut() {
            room.tick();
        }
    }

    pub fn broadcast_snapshots(&mut self) {
        for room in self.rooms.iter() {
            room.broadcast_snapshot();
        }
    }

    pub fn flush_all(&mut self) -> usize {
        self.rooms.iter_mut().map(Room::flush_stores).sum()
    }
}

/// Validate a join token of the form `room:player:nonce`; returns the room
/// id and player id a transport should bind its socket to.
pub fn parse_token(token: &str) -> Result<(String, u16)> {
    let mut parts = token.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(room), Some(player), Some(_nonce), None) => {
            Ok((room.to_owned(), player.parse::<u16>()?))
        }
        _ => bail!("malformed token"),
    }
}

// reach is validated against this; re-exported so transports can surface
// the limit in error payloads
pub const MAX_BUILD_REACH: f32 = MAX_BUILD_DISTANCE;
