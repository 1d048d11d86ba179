//! The client's protocol driver: decodes server frames into world updates,
//! turns streaming plans into request frames, and handles the reconnect
//! backfill. The transport just shuttles byte vectors in both directions.

use nalgebra::Point3;

use terravox_common::{
    net::{frame::quantize_angle, ClientPacket, ServerPacket},
    world::{ChunkPos, TilePos},
};

use crate::{map::TileMap, streaming::ChunkStreamer, world::ClientWorld};

pub struct ClientSession {
    world: ClientWorld,
    streamer: ChunkStreamer,
    map: TileMap,
    player_id: Option<u16>,
    room_id: Option<String>,
    /// highest build seq applied locally; the BUILD_SYNC watermark
    last_build_seq: u32,
    input_seq: u16,
    latest_room_population: u8,
}

impl ClientSession {
    pub fn new(world: ClientWorld) -> Self {
        Self {
            world,
            streamer: ChunkStreamer::new(),
            map: TileMap::new(),
            player_id: None,
            room_id: None,
            last_build_seq: 0,
            input_seq: 0,
            latest_room_population: 0,
        }
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ClientWorld {
        &mut self.world
    }

    pub fn player_id(&self) -> Option<u16> {
        self.player_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn last_build_seq(&self) -> u32 {
        self.last_build_seq
    }

    pub fn room_population(&self) -> u8 {
        self.latest_room_population
    }

    pub fn map(&self) -> &TileMap {
        &self.map
    }

    /// Decode and absorb one server frame. Malformed frames are logged and
    /// dropped, exactly like the server treats ours.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        let packet = match ServerPacket::decode(frame) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("dropping malformed server frame: {}", err);
                return;
            }
        };
        self.handle_packet(packet);
    }

    pub fn handle_packet(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Welcome { player_id, room_id } => {
                self.player_id = Some(player_id);
                self.room_id = Some(room_id);
            }
            ServerPacket::RoomInfo { player_count } => {
                self.latest_room_population = player_count;
            }
            ServerPacket::Snapshot { .. } => {
                // remote player interpolation belongs to the presentation
                // layer; the session only tracks the world
            }
            ServerPacket::BuildCommit {
                build_seq,
                player_id: _,
                op,
            } => {
                self.world.apply_build_commit(build_seq, &op);
                self.last_build_seq = self.last_build_seq.max(build_seq);
            }
            ServerPacket::BuildSync { start_seq, entries } => {
                let mut seq = start_seq;
                for (_player, op) in entries {
                    self.world.apply_build_commit(seq, &op);
                    self.last_build_seq = self.last_build_seq.max(seq);
                    seq += 1;
                }
            }
            ServerPacket::MapTileData {
                pos,
                heights,
                materials,
            } => {
                self.map.insert(pos, heights, materials);
            }
            ServerPacket::ChunkData {
                pos,
                last_build_seq,
                voxels,
            } => {
                self.world.apply_chunk_data(pos, last_build_seq, &voxels);
                self.streamer.chunk_loaded(pos);
            }
            ServerPacket::SurfaceColumnData {
                pos,
                heights,
                materials,
                chunks,
            } => {
                self.map.insert(pos, heights, materials);
                for chunk in chunks {
                    let chunk_pos = pos.chunk(chunk.cy);
                    self.world
                        .apply_chunk_data(chunk_pos, chunk.last_build_seq, &chunk.voxels);
                    self.streamer.chunk_loaded(chunk_pos);
                }
                self.streamer.column_loaded(pos);
            }
            ServerPacket::Pong { .. } => {}
            ServerPacket::Error { code } => {
                log::warn!("server rejected a request, code {}", code);
            }
        }
    }

    /// Streaming heartbeat: figure out what the player's position needs,
    /// unload what it no longer does, and emit the request frames.
    pub fn update_streaming(&mut self, player_pos: Point3<f32>) -> Vec<Vec<u8>> {
        let plan = self.streamer.update(player_pos);

        for pos in plan.unload_chunks.iter() {
            self.world.remove_chunk(*pos);
        }
        for column in plan.unload_columns.iter() {
            self.unload_column(*column);
        }

        let mut frames = Vec::with_capacity(
            plan.column_requests.len() + plan.chunk_requests.len(),
        );
        for pos in plan.column_requests {
            frames.push(ClientPacket::SurfaceColumnRequest(pos).encode());
        }
        for pos in plan.chunk_requests {
            frames.push(ClientPacket::ChunkRequest(pos).encode());
        }
        frames
    }

    fn unload_column(&mut self, column: TilePos) {
        // drop every loaded chunk of the column; the cave set keeps its own
        // entries alive through `loaded_chunks`
        let stacked: Vec<ChunkPos> = (-8..24)
            .map(|cy| column.chunk(cy))
            .filter(|pos| self.world.contains(*pos))
            .collect();
        for pos in stacked {
            self.world.remove_chunk(pos);
            self.streamer.chunk_unloaded(pos);
        }
        self.map.remove(column);
    }

    /// The JOIN + BUILD_SYNC pair a (re)connecting client sends right after
    /// WELCOME, resuming the build log from its watermark.
    pub fn reconnect_frames(&self, protocol_version: u8) -> Vec<Vec<u8>> {
        let player_id = self.player_id.unwrap_or(0);
        vec![
            ClientPacket::Join {
                protocol_version,
                player_id,
            }
            .encode(),
            ClientPacket::BuildSyncRequest {
                since_seq: self.last_build_seq,
            }
            .encode(),
        ]
    }

    /// Pack the local player's pose into an INPUT frame; sequence numbers
    /// advance per call.
    pub fn input_frame(
        &mut self,
        position: Point3<f32>,
        yaw: f32,
        pitch: f32,
        buttons: u8,
    ) -> Vec<u8> {
        self.input_seq = self.input_seq.wrapping_add(1);
        ClientPacket::Input {
            buttons,
            yaw_q: quantize_angle(yaw),
            pitch_q: quantize_angle(pitch),
            seq: self.input_seq,
            position,
        }
        .encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{point, vector, UnitQuaternion};
    use terravox_common::{
        build::{BuildConfig, BuildMode, BuildOperation, BuildShape},
        material::MaterialRegistry,
        net::packet::SurfaceColumnChunk,
        voxel::Voxel,
        world::chunk::Chunk,
        CHUNK_VOLUME,
    };

    fn session() -> ClientSession {
        ClientSession::new(ClientWorld::new(MaterialRegistry::with_default_materials()))
    }

    fn op_at(x: f32) -> BuildOperation {
        BuildOperation {
            center: point![x, 4.0, 4.0],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Cube,
                BuildMode::Add,
                vector![2.0, 2.0, 2.0],
                3,
            ),
        }
    }

    #[test]
    fn welcome_binds_identity() {
        let mut session = session();
        session.handle_packet(ServerPacket::Welcome {
            player_id: 9,
            room_id: "room-3".into(),
        });
        assert_eq!(session.player_id(), Some(9));
        assert_eq!(session.room_id(), Some("room-3"));
    }

    #[test]
    fn surface_columns_land_as_chunks_and_mark_the_streamer() {
        let mut session = session();
        let tile = TilePos::new(0, 0);
        let chunk = Chunk::flat(tile.chunk(0), 16, 3);

        session.handle_packet(ServerPacket::SurfaceColumnData {
            pos: tile,
            heights: vec![15; terravox_common::CHUNK_AREA],
            materials: vec![3; terravox_common::CHUNK_AREA],
            chunks: vec![SurfaceColumnChunk {
                cy: 0,
                last_build_seq: 0,
                voxels: chunk.to_dense().to_vec(),
            }],
        });

        assert!(session.world().contains(tile.chunk(0)));
        assert!(session
            .world()
            .chunk(tile.chunk(0))
            .unwrap()
            .get(1, 1, 1)
            .is_solid());

        // the satisfied column is not requested again
        let frames = session.update_streaming(point![0.0, 4.0, 0.0]);
        let repeat = frames
            .iter()
            .any(|frame| frame == &ClientPacket::SurfaceColumnRequest(tile).encode());
        assert!(!repeat);
    }

    #[test]
    fn commits_and_sync_advance_the_watermark() {
        let mut session = session();
        session.handle_packet(ServerPacket::ChunkData {
            pos: ChunkPos::new([0, 0, 0]),
            last_build_seq: 0,
            voxels: vec![0u16; CHUNK_VOLUME],
        });

        session.handle_packet(ServerPacket::BuildCommit {
            build_seq: 1,
            player_id: 4,
            op: op_at(4.0),
        });
        assert_eq!(session.last_build_seq(), 1);
        assert!(session
            .world()
            .chunk(ChunkPos::new([0, 0, 0]))
            .unwrap()
            .get(16, 16, 16)
            .is_solid());

        // a backfill continues from where the log left off
        session.handle_packet(ServerPacket::BuildSync {
            start_seq: 2,
            entries: vec![(4, op_at(6.0)), (4, op_at(2.0))],
        });
        assert_eq!(session.last_build_seq(), 3);

        let frames = session.reconnect_frames(1);
        let sync = ClientPacket::decode(&frames[1]).unwrap();
        assert_eq!(sync, ClientPacket::BuildSyncRequest { since_seq: 3 });
    }

    #[test]
    fn first_streaming_update_requests_columns_then_chunks() {
        let mut session = session();
        let frames = session.update_streaming(point![0.0, 4.0, 0.0]);
        assert!(!frames.is_empty());

        let packets: Vec<_> = frames
            .iter()
            .map(|frame| ClientPacket::decode(frame).unwrap())
            .collect();
        let first_chunk_request = packets
            .iter()
            .position(|p| matches!(p, ClientPacket::ChunkRequest(_)))
            .unwrap();
        assert!(packets[..first_chunk_request]
            .iter()
            .all(|p| matches!(p, ClientPacket::SurfaceColumnRequest(_))));
        // the nearest column comes first
        assert_eq!(
            packets[0],
            ClientPacket::SurfaceColumnRequest(TilePos::new(0, 0))
        );
    }

    #[test]
    fn unloaded_columns_drop_their_chunk_stack() {
        let mut session = session();
        let tile = TilePos::new(0, 0);
        session.handle_packet(ServerPacket::SurfaceColumnData {
            pos: tile,
            heights: vec![15; terravox_common::CHUNK_AREA],
            materials: vec![3; terravox_common::CHUNK_AREA],
            chunks: vec![SurfaceColumnChunk {
                cy: 0,
                last_build_seq: 0,
                voxels: vec![Voxel::pack(0.5, 3, 0).bits(); CHUNK_VOLUME],
            }],
        });
        assert!(session.world().contains(tile.chunk(0)));

        // teleport far away: the column and its chunks disappear
        session.update_streaming(point![10_000.0, 4.0, 10_000.0]);
        assert!(!session.world().contains(tile.chunk(0)));
    }

    #[test]
    fn input_frames_count_sequence_numbers() {
        let mut session = session();
        let a = session.input_frame(point![0.0, 0.0, 0.0], 0.3, -0.1, 1);
        let b = session.input_frame(point![0.0, 0.0, 0.0], 0.3, -0.1, 1);

        let a = ClientPacket::decode(&a).unwrap();
        let b = ClientPacket::decode(&b).unwrap();
        match (a, b) {
            (ClientPacket::Input { seq: sa, .. }, ClientPacket::Input { seq: sb, .. }) => {
                assert_eq!(sb, sa + 1);
            }
            _ => panic!("expected input packets"),
        }
    }
}
