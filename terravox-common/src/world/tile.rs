//! 2D surface summaries. A tile condenses an entire chunk column into the
//! voxel-Y of the topmost solid surface plus its material, per XZ column.
//! Tiles bootstrap streaming (they reveal which cy range holds terrain) and
//! double as the lightweight map view.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use super::TilePos;
use crate::{CHUNK_AREA, CHUNK_LENGTH};

/// Height written for columns with no solid voxel anywhere in the sampled
/// range.
pub const NO_SURFACE: i16 = i16::MIN;

#[inline(always)]
pub const fn tile_index(lx: usize, lz: usize) -> usize {
    lx + lz * CHUNK_LENGTH
}

#[derive(Clone, Debug)]
pub struct MapTile {
    pos: TilePos,
    heights: Box<[i16]>,
    materials: Box<[u8]>,
    hash: u64,
}

impl MapTile {
    pub fn new(pos: TilePos) -> Self {
        Self {
            pos,
            heights: vec![NO_SURFACE; CHUNK_AREA].into_boxed_slice(),
            materials: vec![0; CHUNK_AREA].into_boxed_slice(),
            hash: 0,
        }
    }

    pub fn pos(&self) -> TilePos {
        self.pos
    }

    pub fn heights(&self) -> &[i16] {
        &self.heights
    }

    pub fn materials(&self) -> &[u8] {
        &self.materials
    }

    pub fn height(&self, lx: usize, lz: usize) -> i16 {
        self.heights[tile_index(lx, lz)]
    }

    pub fn material(&self, lx: usize, lz: usize) -> u8 {
        self.materials[tile_index(lx, lz)]
    }

    pub fn set_column(&mut self, lx: usize, lz: usize, height: i16, material: u8) {
        self.heights[tile_index(lx, lz)] = height;
        self.materials[tile_index(lx, lz)] = material;
    }

    /// Min and max surface height over the tile, ignoring empty columns.
    pub fn height_range(&self) -> Option<(i16, i16)> {
        let mut range = None;
        for &height in self.heights.iter() {
            if height == NO_SURFACE {
                continue;
            }
            range = Some(match range {
                None => (height, height),
                Some((min, max)) => (height.min(min), height.max(max)),
            });
        }
        range
    }

    /// Content hash used for cheap change detection; call after mutating.
    pub fn rehash(&mut self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.heights.hash(&mut hasher);
        self.materials.hash(&mut hasher);
        self.hash = hasher.finish();
        self.hash
    }

    pub fn content_hash(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_range_skips_empty_columns() {
        let mut tile = MapTile::new(TilePos::new(0, 0));
        assert_eq!(tile.height_range(), None);

        tile.set_column(0, 0, 12, 1);
        tile.set_column(5, 7, -3, 2);
        assert_eq!(tile.height_range(), Some((-3, 12)));
    }

    #[test]
    fn rehash_tracks_content_changes() {
        let mut tile = MapTile::new(TilePos::new(1, 1));
        tile.set_column(3, 3, 20, 1);
        let first = tile.rehash();

        tile.set_column(3, 3, 21, 1);
        let second = tile.rehash();
        assert_ne!(first, second);

        tile.set_column(3, 3, 20, 1);
        assert_eq!(tile.rehash(), first);
    }
}
