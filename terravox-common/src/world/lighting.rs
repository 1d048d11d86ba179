//! Sunlight. Two in-place passes over a chunk's grid: a top-down column
//! pass seeded from the chunk above's bottom row, then a 6-neighbor BFS
//! that spreads light sideways and into overhangs.
//!
//! Cross-chunk continuity is approximate on purpose: the column pass takes
//! the neighbor-above's bottom row as input and emits its own bottom row
//! for the chunk below. No global equalization runs.

use std::collections::VecDeque;

use lazy_static::lazy_static;

use super::chunk::{index_to_voxel, voxel_index, Chunk};
use crate::{
    material::MaterialTypeLut,
    world::tile::tile_index,
    CHUNK_AREA, CHUNK_LENGTH, CHUNK_VOLUME,
};

pub const MAX_SUNLIGHT: u8 = 31;

const NEG_X: u8 = 1 << 0;
const POS_X: u8 = 1 << 1;
const NEG_Y: u8 = 1 << 2;
const POS_Y: u8 = 1 << 3;
const NEG_Z: u8 = 1 << 4;
const POS_Z: u8 = 1 << 5;

lazy_static! {
    /// Per-voxel bitmask of in-bounds neighbors, so the BFS inner loop never
    /// does six comparisons per pop.
    static ref NEIGHBOR_MASKS: Box<[u8]> = {
        const MAX: usize = CHUNK_LENGTH - 1;
        let mut masks = vec![0u8; CHUNK_VOLUME].into_boxed_slice();
        for (index, mask) in masks.iter_mut().enumerate() {
            let [x, y, z] = index_to_voxel(index);
            if x > 0 { *mask |= NEG_X; }
            if x < MAX { *mask |= POS_X; }
            if y > 0 { *mask |= NEG_Y; }
            if y < MAX { *mask |= POS_Y; }
            if z > 0 { *mask |= NEG_Z; }
            if z < MAX { *mask |= POS_Z; }
        }
        masks
    };
}

/// Reusable BFS queue; single-threaded, owned by whichever loop runs
/// lighting.
#[derive(Default)]
pub struct LightScratch {
    queue: VecDeque<u32>,
}

/// Top-down column pass. `light_from_above` is the bottom row emitted by the
/// chunk above, or `None` at the top of the world (full sunlight). Returns
/// this chunk's bottom row, the seed for the chunk below.
pub fn compute_sunlight_columns(
    chunk: &mut Chunk,
    light_from_above: Option<&[u8]>,
    lut: &MaterialTypeLut,
) -> Box<[u8]> {
    let mut bottom = vec![0u8; CHUNK_AREA].into_boxed_slice();

    for lz in 0..CHUNK_LENGTH {
        for lx in 0..CHUNK_LENGTH {
            let mut light = match light_from_above {
                Some(row) => row[tile_index(lx, lz)],
                None => MAX_SUNLIGHT,
            };

            for ly in (0..CHUNK_LENGTH).rev() {
                let voxel = chunk.get(lx, ly, lz);
                if !voxel.is_solid() {
                    chunk.set(lx, ly, lz, voxel.with_light(light));
                } else if !lut.is_opaque(voxel.material()) {
                    chunk.set(lx, ly, lz, voxel.with_light(light));
                    light = light.saturating_sub(1);
                } else {
                    chunk.set(lx, ly, lz, voxel.with_light(0));
                    light = 0;
                }
            }

            bottom[tile_index(lx, lz)] = light;
        }
    }

    bottom
}

/// 6-neighbor BFS spread. Seeds every voxel with light > 1 and relaxes
/// neighbors to `source - 1`, skipping opaque solids. The light compare
/// doubles as the visited check.
pub fn propagate_light(chunk: &mut Chunk, lut: &MaterialTypeLut, scratch: &mut LightScratch) {
    scratch.queue.clear();

    for index in 0..CHUNK_VOLUME {
        let [x, y, z] = index_to_voxel(index);
        if chunk.get(x, y, z).light() > 1 {
            scratch.queue.push_back(index as u32);
        }
    }

    while let Some(index) = scratch.queue.pop_front() {
        let index = index as usize;
        let [x, y, z] = index_to_voxel(index);
        let source_light = chunk.get(x, y, z).light();
        if source_light <= 1 {
            continue;
        }
        let spread = source_light - 1;
        let mask = NEIGHBOR_MASKS[index];

        let mut visit = |chunk: &mut Chunk, scratch: &mut LightScratch, x: usize, y: usize, z: usize| {
            let neighbor = chunk.get(x, y, z);
            if neighbor.is_solid() && lut.is_opaque(neighbor.material()) {
                return;
            }
            if spread > neighbor.light() {
                chunk.set(x, y, z, neighbor.with_light(spread));
                scratch.queue.push_back(voxel_index(x, y, z) as u32);
            }
        };

        if mask & NEG_X != 0 {
            visit(chunk, scratch, x - 1, y, z);
        }
        if mask & POS_X != 0 {
            visit(chunk, scratch, x + 1, y, z);
        }
        if mask & NEG_Y != 0 {
            visit(chunk, scratch, x, y - 1, z);
        }
        if mask & POS_Y != 0 {
            visit(chunk, scratch, x, y + 1, z);
        }
        if mask & NEG_Z != 0 {
            visit(chunk, scratch, x, y, z - 1);
        }
        if mask & POS_Z != 0 {
            visit(chunk, scratch, x, y, z + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{material::MaterialRegistry, voxel::Voxel, world::ChunkPos};

    #[test]
    fn open_sky_column_is_fully_lit() {
        let registry = MaterialRegistry::with_default_materials();
        let mut chunk = Chunk::empty(ChunkPos::new([0, 4, 0]));

        let bottom = compute_sunlight_columns(&mut chunk, None, registry.type_lut());

        assert_eq!(chunk.get(0, 31, 0).light(), MAX_SUNLIGHT);
        assert_eq!(chunk.get(12, 0, 20).light(), MAX_SUNLIGHT);
        assert!(bottom.iter().all(|&light| light == MAX_SUNLIGHT));
    }

    #[test]
    fn opaque_ground_zeroes_the_column_below() {
        let registry = MaterialRegistry::with_default_materials();
        let stone = registry.id_for_name("stone").unwrap();
        let mut chunk = Chunk::flat(ChunkPos::new([0, 0, 0]), 16, stone);

        let bottom = compute_sunlight_columns(&mut chunk, None, registry.type_lut());

        assert_eq!(chunk.get(3, 20, 3).light(), MAX_SUNLIGHT);
        assert_eq!(chunk.get(3, 15, 3).light(), 0);
        assert_eq!(chunk.get(3, 2, 3).light(), 0);
        assert!(bottom.iter().all(|&light| light == 0));
    }

    #[test]
    fn water_attenuates_one_level_per_voxel() {
        let registry = MaterialRegistry::with_default_materials();
        let water = registry.id_for_name("water").unwrap();
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        for ly in 24..28 {
            chunk.set(5, ly, 5, Voxel::pack(0.5, water, 0));
        }

        compute_sunlight_columns(&mut chunk, None, registry.type_lut());

        assert_eq!(chunk.get(5, 27, 5).light(), MAX_SUNLIGHT);
        assert_eq!(chunk.get(5, 24, 5).light(), MAX_SUNLIGHT - 3);
        assert_eq!(chunk.get(5, 20, 5).light(), MAX_SUNLIGHT - 4);
    }

    #[test]
    fn bfs_spreads_under_an_overhang() {
        let registry = MaterialRegistry::with_default_materials();
        let stone = registry.id_for_name("stone").unwrap();
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));

        // a roof over x < 16 leaves the region below it dark after the
        // column pass
        for z in 0..CHUNK_LENGTH {
            for x in 0..16 {
                chunk.set(x, 20, z, Voxel::pack(0.5, stone, 0));
            }
        }

        compute_sunlight_columns(&mut chunk, None, registry.type_lut());
        assert_eq!(chunk.get(0, 10, 16).light(), 0);

        let mut scratch = LightScratch::default();
        propagate_light(&mut chunk, registry.type_lut(), &mut scratch);

        // light now leaks sideways from the open half, one level per step
        assert_eq!(chunk.get(15, 10, 16).light(), MAX_SUNLIGHT - 1);
        assert_eq!(chunk.get(12, 10, 16).light(), MAX_SUNLIGHT - 4);
    }

    #[test]
    fn seed_rows_chain_between_stacked_chunks() {
        let registry = MaterialRegistry::with_default_materials();
        let stone = registry.id_for_name("stone").unwrap();

        let mut above = Chunk::flat(ChunkPos::new([0, 1, 0]), 48, stone);
        let bottom = compute_sunlight_columns(&mut above, None, registry.type_lut());
        assert!(bottom.iter().all(|&light| light == 0));

        let mut below = Chunk::empty(ChunkPos::new([0, 0, 0]));
        compute_sunlight_columns(&mut below, Some(&bottom), registry.type_lut());
        assert_eq!(below.get(8, 31, 8).light(), 0);
    }
}
