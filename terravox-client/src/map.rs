//! The 2D map view: tiles received over the wire, kept around for the
//! overview map and for bootstrapping streaming decisions (a tile reveals
//! which cy range of a column is worth asking for).

use std::collections::HashMap;

use terravox_common::{
    world::{
        tile::{tile_index, NO_SURFACE},
        TilePos,
    },
    CHUNK_AREA, CHUNK_LENGTH,
};

#[derive(Clone, Debug)]
pub struct TileView {
    pub heights: Vec<i16>,
    pub materials: Vec<u8>,
}

impl TileView {
    pub fn height(&self, lx: usize, lz: usize) -> i16 {
        self.heights[tile_index(lx, lz)]
    }

    pub fn material(&self, lx: usize, lz: usize) -> u8 {
        self.materials[tile_index(lx, lz)]
    }

    /// The cy range of chunks that intersect this tile's surface, if it
    /// has one.
    pub fn surface_chunk_range(&self) -> Option<(i32, i32)> {
        let mut range: Option<(i32, i32)> = None;
        for &height in self.heights.iter() {
            if height == NO_SURFACE {
                continue;
            }
            let cy = (height as i32).div_euclid(CHUNK_LENGTH as i32);
            range = Some(match range {
                None => (cy, cy),
                Some((min, max)) => (min.min(cy), max.max(cy)),
            });
        }
        range
    }
}

#[derive(Default)]
pub struct TileMap {
    tiles: HashMap<TilePos, TileView>,
}

impl TileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pos: TilePos, heights: Vec<i16>, materials: Vec<u8>) {
        if heights.len() != CHUNK_AREA || materials.len() != CHUNK_AREA {
            log::warn!("discarding malformed tile payload for {}", pos);
            return;
        }
        self.tiles.insert(pos, TileView { heights, materials });
    }

    pub fn remove(&mut self, pos: TilePos) {
        self.tiles.remove(&pos);
    }

    pub fn get(&self, pos: TilePos) -> Option<&TileView> {
        self.tiles.get(&pos)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Surface height at a world-voxel XZ, if the covering tile is known.
    pub fn surface_height(&self, world_x: i32, world_z: i32) -> Option<i16> {
        let pos = TilePos::new(
            world_x.div_euclid(CHUNK_LENGTH as i32),
            world_z.div_euclid(CHUNK_LENGTH as i32),
        );
        let tile = self.tiles.get(&pos)?;
        let lx = world_x.rem_euclid(CHUNK_LENGTH as i32) as usize;
        let lz = world_z.rem_euclid(CHUNK_LENGTH as i32) as usize;
        match tile.height(lx, lz) {
            NO_SURFACE => None,
            height => Some(height),
        }
    }
}
