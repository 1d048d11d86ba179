//! The message table. One byte of id, then the payload fields in order;
//! both sides share this single table and reject unknown ids at dispatch.

use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

use super::frame::{FrameReader, FrameWriter};
use crate::{
    build::{BuildConfig, BuildMode, BuildOperation, BuildShape},
    prelude::*,
    world::{tile::MapTile, ChunkPos, TilePos},
    CHUNK_AREA, CHUNK_VOLUME,
};

pub mod id {
    pub const JOIN: u8 = 0x01;
    pub const INPUT: u8 = 0x02;
    pub const PING: u8 = 0x03;
    pub const BUILD_INTENT: u8 = 0x04;
    pub const CHUNK_REQUEST: u8 = 0x05;
    pub const MAP_TILE_REQUEST: u8 = 0x06;
    pub const SURFACE_COLUMN_REQUEST: u8 = 0x07;
    pub const BUILD_SYNC_REQUEST: u8 = 0x08;

    pub const WELCOME: u8 = 0x10;
    pub const ROOM_INFO: u8 = 0x11;
    pub const SNAPSHOT: u8 = 0x12;
    pub const BUILD_COMMIT: u8 = 0x13;
    pub const BUILD_SYNC: u8 = 0x14;
    pub const MAP_TILE_DATA: u8 = 0x15;
    pub const CHUNK_DATA: u8 = 0x16;
    pub const SURFACE_COLUMN_DATA: u8 = 0x17;
    pub const PONG: u8 = 0x18;
    pub const ERROR: u8 = 0x19;
}

const CONFIG_FLAG_CLOSED: u8 = 1 << 0;
const CONFIG_FLAG_THICKNESS: u8 = 1 << 1;
const CONFIG_FLAG_ARC_SWEEP: u8 = 1 << 2;

/// 14 bytes on the wire.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlayerSnapshot {
    pub id: u16,
    pub x_q: i16,
    pub y_q: i16,
    pub z_q: i16,
    pub yaw_q: i16,
    pub pitch_q: i16,
    pub buttons: u8,
    pub flags: u8,
}

pub mod snapshot_flags {
    pub const GROUNDED: u8 = 1 << 0;
    pub const SPRINTING: u8 = 1 << 1;
    pub const BUILDING: u8 = 1 << 2;
}

impl PlayerSnapshot {
    fn write(&self, writer: &mut FrameWriter) {
        writer.write_u16(self.id);
        writer.write_i16(self.x_q);
        writer.write_i16(self.y_q);
        writer.write_i16(self.z_q);
        writer.write_i16(self.yaw_q);
        writer.write_i16(self.pitch_q);
        writer.write_u8(self.buttons);
        writer.write_u8(self.flags);
    }

    fn read(reader: &mut FrameReader) -> Result<Self> {
        Ok(Self {
            id: reader.read_u16()?,
            x_q: reader.read_i16()?,
            y_q: reader.read_i16()?,
            z_q: reader.read_i16()?,
            yaw_q: reader.read_i16()?,
            pitch_q: reader.read_i16()?,
            buttons: reader.read_u8()?,
            flags: reader.read_u8()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientPacket {
    Join {
        protocol_version: u8,
        player_id: u16,
    },
    Input {
        buttons: u8,
        yaw_q: i16,
        pitch_q: i16,
        seq: u16,
        position: Point3<f32>,
    },
    Ping {
        timestamp: u32,
    },
    BuildIntent(BuildOperation),
    ChunkRequest(ChunkPos),
    MapTileRequest(TilePos),
    SurfaceColumnRequest(TilePos),
    BuildSyncRequest {
        since_seq: u32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerPacket {
    Welcome {
        player_id: u16,
        room_id: String,
    },
    RoomInfo {
        player_count: u8,
    },
    Snapshot {
        tick: u32,
        players: Vec<PlayerSnapshot>,
    },
    BuildCommit {
        build_seq: u32,
        player_id: u16,
        op: BuildOperation,
    },
    BuildSync {
        start_seq: u32,
        entries: Vec<(u16, BuildOperation)>,
    },
    MapTileData {
        pos: TilePos,
        heights: Vec<i16>,
        materials: Vec<u8>,
    },
    ChunkData {
        pos: ChunkPos,
        last_build_seq: u32,
        voxels: Vec<u16>,
    },
    SurfaceColumnData {
        pos: TilePos,
        heights: Vec<i16>,
        materials: Vec<u8>,
        chunks: Vec<SurfaceColumnChunk>,
    },
    Pong {
        timestamp: u32,
    },
    Error {
        code: u8,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceColumnChunk {
    pub cy: i32,
    pub last_build_seq: u32,
    pub voxels: Vec<u16>,
}

fn write_operation(writer: &mut FrameWriter, op: &BuildOperation) {
    writer.write_f32(op.center.x);
    writer.write_f32(op.center.y);
    writer.write_f32(op.center.z);

    let quat = op.rotation.quaternion();
    writer.write_f32(quat.i);
    writer.write_f32(quat.j);
    writer.write_f32(quat.k);
    writer.write_f32(quat.w);

    let config = &op.config;
    writer.write_u8(config.shape as u8);
    writer.write_u8(config.mode as u8);
    writer.write_f32(config.size.x);
    writer.write_f32(config.size.y);
    writer.write_f32(config.size.z);
    writer.write_u8(config.material);

    let mut flags = 0u8;
    if config.closed {
        flags |= CONFIG_FLAG_CLOSED;
    }
    if config.thickness.is_some() {
        flags |= CONFIG_FLAG_THICKNESS;
    }
    if config.arc_sweep.is_some() {
        flags |= CONFIG_FLAG_ARC_SWEEP;
    }
    writer.write_u8(flags);
    if let Some(thickness) = config.thickness {
        writer.write_f32(thickness);
    }
    if let Some(arc_sweep) = config.arc_sweep {
        writer.write_f32(arc_sweep);
    }
}

fn read_operation(reader: &mut FrameReader) -> Result<BuildOperation> {
    let center = point![reader.read_f32()?, reader.read_f32()?, reader.read_f32()?];

    let (i, j, k, w) = (
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_f32()?,
    );
    // senders only ever produce unit quaternions; skipping renormalization
    // keeps the wire round-trip bit-exact
    let rotation = UnitQuaternion::new_unchecked(Quaternion::new(w, i, j, k));

    let shape_id = reader.read_u8()?;
    let shape = BuildShape::from_id(shape_id)
        .ok_or_else(|| anyhow!("unknown build shape {}", shape_id))?;
    let mode_id = reader.read_u8()?;
    let mode =
        BuildMode::from_id(mode_id).ok_or_else(|| anyhow!("unknown build mode {}", mode_id))?;

    let size = Vector3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?);
    let material = reader.read_u8()?;
    let flags = reader.read_u8()?;

    let thickness = if flags & CONFIG_FLAG_THICKNESS != 0 {
        Some(reader.read_f32()?)
    } else {
        None
    };
    let arc_sweep = if flags & CONFIG_FLAG_ARC_SWEEP != 0 {
        Some(reader.read_f32()?)
    } else {
        None
    };

    Ok(BuildOperation {
        center,
        rotation,
        config: BuildConfig {
            shape,
            mode,
            size,
            material,
            thickness,
            closed: flags & CONFIG_FLAG_CLOSED != 0,
            arc_sweep,
        },
    })
}

fn write_tile_payload(writer: &mut FrameWriter, pos: TilePos, heights: &[i16], materials: &[u8]) {
    debug_assert_eq!(heights.len(), CHUNK_AREA);
    debug_assert_eq!(materials.len(), CHUNK_AREA);
    writer.write_i32(pos.x);
    writer.write_i32(pos.z);
    writer.write_i16_slice(heights);
    writer.write_bytes(materials);
}

fn read_tile_payload(reader: &mut FrameReader) -> Result<(TilePos, Vec<i16>, Vec<u8>)> {
    let pos = TilePos::new(reader.read_i32()?, reader.read_i32()?);
    let heights = reader.read_i16_vec(CHUNK_AREA)?;
    let materials = reader.read_bytes(CHUNK_AREA)?.to_vec();
    Ok((pos, heights, materials))
}

impl ClientPacket {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientPacket::Join {
                protocol_version,
                player_id,
            } => {
                let mut writer = FrameWriter::new(id::JOIN);
                writer.write_u8(*protocol_version);
                writer.write_u16(*player_id);
                writer.finish()
            }
            ClientPacket::Input {
                buttons,
                yaw_q,
                pitch_q,
                seq,
                position,
            } => {
                let mut writer = FrameWriter::new(id::INPUT);
                writer.write_u8(*buttons);
                writer.write_i16(*yaw_q);
                writer.write_i16(*pitch_q);
                writer.write_u16(*seq);
                writer.write_f32(position.x);
                writer.write_f32(position.y);
                writer.write_f32(position.z);
                writer.finish()
            }
            ClientPacket::Ping { timestamp } => {
                let mut writer = FrameWriter::new(id::PING);
                writer.write_u32(*timestamp);
                writer.finish()
            }
            ClientPacket::BuildIntent(op) => {
                let mut writer = FrameWriter::new(id::BUILD_INTENT);
                write_operation(&mut writer, op);
                writer.finish()
            }
            ClientPacket::ChunkRequest(pos) => {
                let mut writer = FrameWriter::new(id::CHUNK_REQUEST);
                writer.write_i32(pos.x);
                writer.write_i32(pos.y);
                writer.write_i32(pos.z);
                writer.finish()
            }
            ClientPacket::MapTileRequest(pos) => {
                let mut writer = FrameWriter::new(id::MAP_TILE_REQUEST);
                writer.write_i32(pos.x);
                writer.write_i32(pos.z);
                writer.finish()
            }
            ClientPacket::SurfaceColumnRequest(pos) => {
                let mut writer = FrameWriter::new(id::SURFACE_COLUMN_REQUEST);
                writer.write_i32(pos.x);
                writer.write_i32(pos.z);
                writer.finish()
            }
            ClientPacket::BuildSyncRequest { since_seq } => {
                let mut writer = FrameWriter::new(id::BUILD_SYNC_REQUEST);
                writer.write_u32(*since_seq);
                writer.finish()
            }
        }
    }

    pub fn decode(frame: &[u8]) -> Result<ClientPacket> {
        let (&frame_id, payload) = frame
            .split_first()
            .ok_or_else(|| anyhow!("empty frame"))?;
        let mut reader = FrameReader::new(payload);

        let packet = match frame_id {
            id::JOIN => ClientPacket::Join {
                protocol_version: reader.read_u8()?,
                player_id: reader.read_u16()?,
            },
            id::INPUT => ClientPacket::Input {
                buttons: reader.read_u8()?,
                yaw_q: reader.read_i16()?,
                pitch_q: reader.read_i16()?,
                seq: reader.read_u16()?,
                position: point![reader.read_f32()?, reader.read_f32()?, reader.read_f32()?],
            },
            id::PING => ClientPacket::Ping {
                timestamp: reader.read_u32()?,
            },
            id::BUILD_INTENT => ClientPacket::BuildIntent(read_operation(&mut reader)?),
            id::CHUNK_REQUEST => ClientPacket::ChunkRequest(ChunkPos::new([
                reader.read_i32()?,
                reader.read_i32()?,
                reader.read_i32()?,
            ])),
            id::MAP_TILE_REQUEST => {
                ClientPacket::MapTileRequest(TilePos::new(reader.read_i32()?, reader.read_i32()?))
            }
            id::SURFACE_COLUMN_REQUEST => ClientPacket::SurfaceColumnRequest(TilePos::new(
                reader.read_i32()?,
                reader.read_i32()?,
            )),
            id::BUILD_SYNC_REQUEST => ClientPacket::BuildSyncRequest {
                since_seq: reader.read_u32()?,
            },
            other => bail!("unknown client packet id {:#04x}", other),
        };

        reader.expect_end()?;
        Ok(packet)
    }
}

impl ServerPacket {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerPacket::Welcome { player_id, room_id } => {
                let mut writer = FrameWriter::new(id::WELCOME);
                writer.write_u16(*player_id);
                writer.write_short_str(room_id);
                writer.finish()
            }
            ServerPacket::RoomInfo { player_count } => {
                let mut writer = FrameWriter::new(id::ROOM_INFO);
                writer.write_u8(*player_count);
                writer.finish()
            }
            ServerPacket::Snapshot { tick, players } => {
                let mut writer = FrameWriter::new(id::SNAPSHOT);
                writer.write_u32(*tick);
                debug_assert!(players.len() <= u8::MAX as usize);
                writer.write_u8(players.len().min(u8::MAX as usize) as u8);
                for player in players.iter().take(u8::MAX as usize) {
                    player.write(&mut writer);
                }
                writer.finish()
            }
            ServerPacket::BuildCommit {
                build_seq,
                player_id,
                op,
            } => {
                let mut writer = FrameWriter::new(id::BUILD_COMMIT);
                writer.write_u32(*build_seq);
                writer.write_u16(*player_id);
                write_operation(&mut writer, op);
                writer.finish()
            }
            ServerPacket::BuildSync { start_seq, entries } => {
                let mut writer = FrameWriter::new(id::BUILD_SYNC);
                writer.write_u32(*start_seq);
                writer.write_u16(entries.len().min(u16::MAX as usize) as u16);
                for (player_id, op) in entries.iter().take(u16::MAX as usize) {
                    writer.write_u16(*player_id);
                    write_operation(&mut writer, op);
                }
                writer.finish()
            }
            ServerPacket::MapTileData {
                pos,
                heights,
                materials,
            } => {
                let mut writer = FrameWriter::new(id::MAP_TILE_DATA);
                write_tile_payload(&mut writer, *pos, heights, materials);
                writer.finish()
            }
            ServerPacket::ChunkData {
                pos,
                last_build_seq,
                voxels,
            } => {
                debug_assert_eq!(voxels.len(), CHUNK_VOLUME);
                let mut writer = FrameWriter::new(id::CHUNK_DATA);
                writer.write_i32(pos.x);
                writer.write_i32(pos.y);
                writer.write_i32(pos.z);
                writer.write_u32(*last_build_seq);
                writer.write_u16_slice(voxels);
                writer.finish()
            }
            ServerPacket::SurfaceColumnData {
                pos,
                heights,
                materials,
                chunks,
            } => {
                let mut writer = FrameWriter::new(id::SURFACE_COLUMN_DATA);
                write_tile_payload(&mut writer, *pos, heights, materials);
                writer.write_u16(chunks.len().min(u16::MAX as usize) as u16);
                for chunk in chunks.iter().take(u16::MAX as usize) {
                    debug_assert_eq!(chunk.voxels.len(), CHUNK_VOLUME);
                    writer.write_i32(chunk.cy);
                    writer.write_u32(chunk.last_build_seq);
                    writer.write_u16_slice(&chunk.voxels);
                }
                writer.finish()
            }
            ServerPacket::Pong { timestamp } => {
                let mut writer = FrameWriter::new(id::PONG);
                writer.write_u32(*timestamp);
                writer.finish()
            }
            ServerPacket::Error { code } => {
                let mut writer = FrameWriter::new(id::ERROR);
                writer.write_u8(*code);
                writer.finish()
            }
        }
    }

    pub fn decode(frame: &[u8]) -> Result<ServerPacket> {
        let (&frame_id, payload) = frame
            .split_first()
            .ok_or_else(|| anyhow!("empty frame"))?;
        let mut reader = FrameReader::new(payload);

        let packet = match frame_id {
            id::WELCOME => ServerPacket::Welcome {
                player_id: reader.read_u16()?,
                room_id: reader.read_short_str()?,
            },
            id::ROOM_INFO => ServerPacket::RoomInfo {
                player_count: reader.read_u8()?,
            },
            id::SNAPSHOT => {
                let tick = reader.read_u32()?;
                let count = reader.read_u8()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push(PlayerSnapshot::read(&mut reader)?);
                }
                ServerPacket::Snapshot { tick, players }
            }
            id::BUILD_COMMIT => ServerPacket::BuildCommit {
                build_seq: reader.read_u32()?,
                player_id: reader.read_u16()?,
                op: read_operation(&mut reader)?,
            },
            id::BUILD_SYNC => {
                let start_seq = reader.read_u32()?;
                let count = reader.read_u16()? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let player_id = reader.read_u16()?;
                    entries.push((player_id, read_operation(&mut reader)?));
                }
                ServerPacket::BuildSync { start_seq, entries }
            }
            id::MAP_TILE_DATA => {
                let (pos, heights, materials) = read_tile_payload(&mut reader)?;
                ServerPacket::MapTileData {
                    pos,
                    heights,
                    materials,
                }
            }
            id::CHUNK_DATA => ServerPacket::ChunkData {
                pos: ChunkPos::new([reader.read_i32()?, reader.read_i32()?, reader.read_i32()?]),
                last_build_seq: reader.read_u32()?,
                voxels: reader.read_u16_vec(CHUNK_VOLUME)?,
            },
            id::SURFACE_COLUMN_DATA => {
                let (pos, heights, materials) = read_tile_payload(&mut reader)?;
                let count = reader.read_u16()? as usize;
                let mut chunks = Vec::with_capacity(count);
                for _ in 0..count {
                    chunks.push(SurfaceColumnChunk {
                        cy: reader.read_i32()?,
                        last_build_seq: reader.read_u32()?,
                        voxels: reader.read_u16_vec(CHUNK_VOLUME)?,
                    });
                }
                ServerPacket::SurfaceColumnData {
                    pos,
                    heights,
                    materials,
                    chunks,
                }
            }
            id::PONG => ServerPacket::Pong {
                timestamp: reader.read_u32()?,
            },
            id::ERROR => ServerPacket::Error {
                code: reader.read_u8()?,
            },
            other => bail!("unknown server packet id {:#04x}", other),
        };

        reader.expect_end()?;
        Ok(packet)
    }

    pub fn tile_data(tile: &MapTile) -> ServerPacket {
        ServerPacket::MapTileData {
            pos: tile.pos(),
            heights: tile.heights().to_vec(),
            materials: tile.materials().to_vec(),
        }
    }
}
