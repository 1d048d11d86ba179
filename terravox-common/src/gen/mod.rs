//! Deterministic terrain. Three noise layers produce a per-column surface
//! height in voxel-Y units, materials band by depth from the surface, and
//! whole chunks short-circuit to homogeneous air or stone when they sit
//! entirely outside the surface band.

use ::noise::{Fbm, Perlin, RidgedMulti};
use std::sync::Arc;

use self::noise::{fbm, NoiseSampler};
use crate::{
    material::MaterialRegistry,
    voxel::{Voxel, AIR},
    world::{
        chunk::{ArrayChunk, ChunkData},
        ChunkPos,
    },
    CHUNK_AREA, CHUNK_LENGTH, CHUNK_VOLUME,
};

pub mod noise;
pub mod stamp;

/// Water line in voxel-Y units; columns at or below it grow sand instead of
/// grass.
pub const WATER_LINE: i32 = 12;

/// Mean terrain level in voxel-Y units.
const BASE_LEVEL: f32 = 24.0;
const CONTINENT_AMPLITUDE: f32 = 36.0;
const HILL_AMPLITUDE: f32 = 22.0;
const DETAIL_AMPLITUDE: f32 = 2.5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SurfaceSample {
    pub height: i16,
    pub material: u8,
}

/// Voxel-Y of the topmost voxel the weight model reconstructs as solid for a
/// fractional surface height: a voxel is solid when its center sits at or
/// below the surface.
pub fn surface_voxel_y(height: f32) -> i32 {
    (height - 0.5).floor() as i32
}

pub struct TerrainGenerator {
    seed: u32,
    continental: NoiseSampler<Fbm, 2>,
    hills: NoiseSampler<RidgedMulti, 2>,
    detail: NoiseSampler<Perlin, 2>,
    grass: u8,
    dirt: u8,
    stone: u8,
    sand: u8,
}

impl TerrainGenerator {
    pub fn new(seed: u32, registry: &Arc<MaterialRegistry>) -> Self {
        let lookup = |name: &str| registry.id_for_name(name).unwrap_or(0);
        Self {
            seed,
            continental: NoiseSampler::seeded(seed, fbm(seed, 4, 2.0, 0.5)).with_scale(0.0016),
            hills: NoiseSampler::seeded(seed.wrapping_add(1), RidgedMulti::new()).with_scale(0.006),
            detail: NoiseSampler::seeded(seed.wrapping_add(2), Perlin::new()).with_scale(0.08),
            grass: lookup("grass"),
            dirt: lookup("dirt"),
            stone: lookup("stone"),
            sand: lookup("sand"),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Surface height at world-voxel XZ, in fractional voxel-Y units.
    pub fn sample_height(&self, world_x: f32, world_z: f32) -> f32 {
        let pos = [world_x, world_z];
        let continents = self.continental.sample(pos) * CONTINENT_AMPLITUDE;
        let hills = self.hills.sample(pos).abs() * HILL_AMPLITUDE;
        let detail = self.detail.sample(pos) * DETAIL_AMPLITUDE;
        BASE_LEVEL + continents + hills + detail
    }

    pub fn sample_surface(&self, world_x: f32, world_z: f32) -> SurfaceSample {
        let height = self.sample_height(world_x, world_z);
        let top = surface_voxel_y(height);
        SurfaceSample {
            height: top.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            material: self.material_at_depth(top, 0),
        }
    }

    fn material_at_depth(&self, surface: i32, depth: i32) -> u8 {
        if surface <= WATER_LINE + 1 {
            // beaches keep sand a few voxels deep
            if depth <= 3 {
                return self.sand;
            }
            return self.stone;
        }
        match depth {
            0 => self.grass,
            d if d <= 3 => self.dirt,
            _ => self.stone,
        }
    }

    /// Generate the terrain voxels of one chunk. Byte-identical for a fixed
    /// seed no matter when or where it runs.
    pub fn generate_chunk(&self, pos: ChunkPos) -> ChunkData {
        let origin = pos.origin();
        let base_y = origin.y;
        let top_y = base_y + CHUNK_LENGTH as i32;

        let mut heights = [0f32; CHUNK_AREA];
        let mut min_height = f32::MAX;
        let mut max_height = f32::MIN;
        for lz in 0..CHUNK_LENGTH {
            for lx in 0..CHUNK_LENGTH {
                let height = self.sample_height(
                    (origin.x + lx as i32) as f32,
                    (origin.z + lz as i32) as f32,
                );
                heights[lx + lz * CHUNK_LENGTH] = height;
                min_height = min_height.min(height);
                max_height = max_height.max(height);
            }
        }

        // fully above or below the surface band: nothing to reconstruct
        if base_y as f32 > max_height + 1.0 {
            return ChunkData::Homogeneous(AIR);
        }
        if (top_y as f32) < min_height - 1.0 {
            return ChunkData::Homogeneous(Voxel::pack(0.5, self.stone, 0));
        }

        let mut voxels = Vec::with_capacity(CHUNK_VOLUME);
        voxels.resize(CHUNK_VOLUME, AIR);
        for lz in 0..CHUNK_LENGTH {
            for ly in 0..CHUNK_LENGTH {
                let world_y = base_y + ly as i32;
                for lx in 0..CHUNK_LENGTH {
                    let height = heights[lx + lz * CHUNK_LENGTH];
                    // signed distance to the column surface; positive inside
                    let distance = height - (world_y as f32 + 0.5);
                    if distance <= -1.0 {
                        continue;
                    }

                    let weight = distance.max(-0.5).min(0.5);
                    let surface = surface_voxel_y(height);
                    let material = self.material_at_depth(surface, surface - world_y);
                    let index = lx + ly * CHUNK_LENGTH + lz * CHUNK_AREA;
                    voxels[index] = Voxel::pack(weight, material, 0);
                }
            }
        }

        ChunkData::Array(
            ArrayChunk::try_from(voxels.into_boxed_slice()).expect("chunk volume is fixed"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk::Chunk;

    fn generator() -> TerrainGenerator {
        TerrainGenerator::new(1234, &MaterialRegistry::with_default_materials())
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generator();
        let b = generator();
        for &pos in &[
            ChunkPos::new([0, 0, 0]),
            ChunkPos::new([3, 1, -2]),
            ChunkPos::new([-5, 0, 9]),
        ] {
            let chunk_a = Chunk::new(pos, a.generate_chunk(pos));
            let chunk_b = Chunk::new(pos, b.generate_chunk(pos));
            assert_eq!(chunk_a.to_dense(), chunk_b.to_dense());
        }
    }

    #[test]
    fn chunks_far_above_are_air_far_below_are_stone() {
        let gen = generator();
        let sky = gen.generate_chunk(ChunkPos::new([0, 40, 0]));
        assert_eq!(sky.is_homogeneous(), Some(AIR));

        let deep = gen.generate_chunk(ChunkPos::new([0, -40, 0]));
        let voxel = deep.is_homogeneous().expect("deep chunk is homogeneous");
        assert!(voxel.is_solid());
    }

    #[test]
    fn surface_sample_matches_generated_voxels() {
        let gen = generator();
        for &(wx, wz) in &[(0, 0), (17, 45), (-30, 12)] {
            let surface = gen.sample_surface(wx as f32, wz as f32);
            let (chunk_pos, [lx, ly, lz]) = crate::world::VoxelPos::new([
                wx,
                surface.height as i32,
                wz,
            ])
            .chunk_and_offset();

            let data = gen.generate_chunk(chunk_pos);
            let voxel = data.get([lx, ly, lz]);
            assert!(
                voxel.is_solid(),
                "surface voxel at ({}, {}, {}) not solid",
                wx,
                surface.height,
                wz
            );
            assert_eq!(voxel.material(), surface.material);
        }
    }

    #[test]
    fn column_is_air_above_surface_and_solid_below() {
        let gen = generator();
        let surface = gen.sample_surface(10.0, 10.0);
        let above = crate::world::VoxelPos::new([10, surface.height as i32 + 3, 10]);
        let below = crate::world::VoxelPos::new([10, surface.height as i32 - 3, 10]);

        for &pos in &[above, below] {
            let (chunk_pos, [lx, ly, lz]) = pos.chunk_and_offset();
            let data = gen.generate_chunk(chunk_pos);
            let solid = data.get([lx, ly, lz]).is_solid();
            assert_eq!(solid, pos == below);
        }
    }
}
