//! Two-tier chunk streaming for the local player.
//!
//! Surface columns stream in a wide Chebyshev ring around the player's
//! column; full 3D cave chunks stream in a tighter cube around the player's
//! chunk. Targets are diffed against what is already loaded or requested,
//! new requests go out nearest-first, and unloading waits for an extra
//! margin so small movements never thrash.

use nalgebra::Point3;
use std::collections::HashSet;

use terravox_common::world::{world_to_chunk, ChunkPos, TilePos};

pub const SURFACE_COLUMN_RADIUS: i32 = 4;
pub const PLAYER_CHUNK_RADIUS: i32 = 2;
pub const UNLOAD_MARGIN: i32 = 2;

#[derive(Debug, Default)]
pub struct StreamingPlan {
    /// nearest-first
    pub column_requests: Vec<TilePos>,
    /// nearest-first
    pub chunk_requests: Vec<ChunkPos>,
    pub unload_columns: Vec<TilePos>,
    pub unload_chunks: Vec<ChunkPos>,
}

impl StreamingPlan {
    pub fn is_empty(&self) -> bool {
        self.column_requests.is_empty()
            && self.chunk_requests.is_empty()
            && self.unload_columns.is_empty()
            && self.unload_chunks.is_empty()
    }
}

#[derive(Default)]
pub struct ChunkStreamer {
    loaded_columns: HashSet<TilePos>,
    requested_columns: HashSet<TilePos>,
    loaded_chunks: HashSet<ChunkPos>,
    requested_chunks: HashSet<ChunkPos>,
}

impl ChunkStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data for a requested column arrived (or was otherwise satisfied).
    pub fn column_loaded(&mut self, pos: TilePos) {
        self.requested_columns.remove(&pos);
        self.loaded_columns.insert(pos);
    }

    pub fn chunk_loaded(&mut self, pos: ChunkPos) {
        self.requested_chunks.remove(&pos);
        self.loaded_chunks.insert(pos);
    }

    pub fn column_unloaded(&mut self, pos: TilePos) {
        self.loaded_columns.remove(&pos);
    }

    pub fn chunk_unloaded(&mut self, pos: ChunkPos) {
        self.loaded_chunks.remove(&pos);
    }

    pub fn is_column_loaded(&self, pos: TilePos) -> bool {
        self.loaded_columns.contains(&pos)
    }

    /// Compute what to request and what to drop for the player's current
    /// position. Call at a fixed cadence; requested entries are remembered
    /// so a slow server is not asked twice.
    pub fn update(&mut self, player_pos: Point3<f32>) -> StreamingPlan {
        let player_chunk = world_to_chunk(player_pos);
        let player_column = player_chunk.column();

        let mut plan = StreamingPlan::default();

        // surface columns around the player's column
        let mut wanted_columns = Vec::new();
        for dz in -SURFACE_COLUMN_RADIUS..=SURFACE_COLUMN_RADIUS {
            for dx in -SURFACE_COLUMN_RADIUS..=SURFACE_COLUMN_RADIUS {
                let pos = TilePos::new(player_column.x + dx, player_column.z + dz);
                if !self.loaded_columns.contains(&pos) && !self.requested_columns.contains(&pos) {
                    wanted_columns.push(pos);
                }
            }
        }
        wanted_columns.sort_by_key(|pos| pos.chebyshev_distance(player_column));
        for &pos in wanted_columns.iter() {
            self.requested_columns.insert(pos);
        }
        plan.column_requests = wanted_columns;

        // player-local cave chunks
        let mut wanted_chunks = Vec::new();
        for dz in -PLAYER_CHUNK_RADIUS..=PLAYER_CHUNK_RADIUS {
            for dy in -PLAYER_CHUNK_RADIUS..=PLAYER_CHUNK_RADIUS {
                for dx in -PLAYER_CHUNK_RADIUS..=PLAYER_CHUNK_RADIUS {
                    let pos = player_chunk.offset([dx, dy, dz]);
                    if !self.loaded_chunks.contains(&pos) && !self.requested_chunks.contains(&pos) {
                        wanted_chunks.push(pos);
                    }
                }
            }
        }
        wanted_chunks.sort_by_key(|pos| pos.chebyshev_distance(player_chunk));
        for &pos in wanted_chunks.iter() {
            self.requested_chunks.insert(pos);
        }
        plan.chunk_requests = wanted_chunks;

        // hysteresis: only unload once outside target + margin
        let keep_columns = SURFACE_COLUMN_RADIUS + UNLOAD_MARGIN;
        plan.unload_columns = self
            .loaded_columns
            .iter()
            .copied()
            .filter(|pos| pos.chebyshev_distance(player_column) > keep_columns)
            .collect();
        for pos in plan.unload_columns.iter() {
            self.loaded_columns.remove(pos);
        }

        let keep_chunks = PLAYER_CHUNK_RADIUS + UNLOAD_MARGIN;
        plan.unload_chunks = self
            .loaded_chunks
            .iter()
            .copied()
            .filter(|pos| pos.chebyshev_distance(player_chunk) > keep_chunks)
            .collect();
        for pos in plan.unload_chunks.iter() {
            self.loaded_chunks.remove(pos);
        }

        // stale requests outside the keep range are forgotten so they can
        // re-request if the player returns
        self.requested_columns
            .retain(|pos| pos.chebyshev_distance(player_column) <= keep_columns);
        self.requested_chunks
            .retain(|pos| pos.chebyshev_distance(player_chunk) <= keep_chunks);

        plan
    }
}
