//! Baked decoration stamps (trees, rocks, huts) and their deterministic
//! placement.
//!
//! Placement iterates *global* grid cells overlapping the target chunk plus
//! a margin, never chunk-relative ones: every chunk that can see a stamp
//! derives the same anchor, variant and rotation from the same cell hash,
//! so generation order does not matter. Application then writes only the
//! voxels that intersect the chunk at hand.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::sync::Arc;

use super::{surface_voxel_y, TerrainGenerator};
use crate::{
    material::MaterialRegistry,
    voxel::Voxel,
    world::{chunk::Chunk, ChunkPos, VoxelPos},
    CHUNK_LENGTH,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StampVoxel {
    pub offset: [i32; 3],
    pub weight_bits: u16,
    pub material: u8,
}

#[derive(Clone, Debug)]
pub struct Stamp {
    voxels: Vec<StampVoxel>,
    /// max horizontal |offset| over all voxels
    radius: i32,
}

impl Stamp {
    fn from_voxels(voxels: Vec<StampVoxel>) -> Self {
        let radius = voxels
            .iter()
            .map(|v| v.offset[0].abs().max(v.offset[2].abs()))
            .max()
            .unwrap_or(0);
        Self { voxels, radius }
    }

    pub fn voxels(&self) -> &[StampVoxel] {
        &self.voxels
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StampKind {
    BuildingHut = 0,
    RockLarge = 1,
    RockSmall = 2,
    TreeOak = 3,
    TreePine = 4,
}

#[derive(Clone, Debug)]
pub struct StampType {
    pub kind: StampKind,
    /// lower sorts first; buildings claim ground before rocks, rocks before
    /// trees
    pub priority: u8,
    /// cell edge of the global placement grid, in voxels
    pub grid_size: i32,
    /// fraction of `grid_size` the anchor may wander off the cell center,
    /// in `[0, 0.5]`
    pub jitter: f32,
    pub exclusion_radius: f32,
    pub variants: Vec<Stamp>,
}

pub struct StampLibrary {
    types: Vec<StampType>,
    margin: i32,
}

/// Library bake seed. Changing it reshapes every stamp in every world, so
/// it is part of the generation format.
const BAKE_SEED: u64 = 0x7e55a11d;

impl StampLibrary {
    pub fn standard(registry: &Arc<MaterialRegistry>) -> Arc<StampLibrary> {
        let lookup = |name: &str| registry.id_for_name(name).unwrap_or(0);
        let wood = lookup("wood");
        let leaves = lookup("leaves");
        let stone = lookup("stone");
        let brick = lookup("brick");

        let mut rng = SmallRng::seed_from_u64(BAKE_SEED);

        let mut types = vec![
            StampType {
                kind: StampKind::BuildingHut,
                priority: 0,
                grid_size: 96,
                jitter: 0.4,
                exclusion_radius: 14.0,
                variants: (0..2).map(|_| bake_hut(&mut rng, brick, wood)).collect(),
            },
            StampType {
                kind: StampKind::RockLarge,
                priority: 1,
                grid_size: 48,
                jitter: 0.5,
                exclusion_radius: 6.0,
                variants: (0..3).map(|_| bake_rock(&mut rng, stone, 3..6)).collect(),
            },
            StampType {
                kind: StampKind::RockSmall,
                priority: 2,
                grid_size: 24,
                jitter: 0.5,
                exclusion_radius: 3.0,
                variants: (0..3).map(|_| bake_rock(&mut rng, stone, 1..3)).collect(),
            },
            StampType {
                kind: StampKind::TreeOak,
                priority: 3,
                grid_size: 16,
                jitter: 0.5,
                exclusion_radius: 4.0,
                variants: (0..4).map(|_| bake_oak(&mut rng, wood, leaves)).collect(),
            },
            StampType {
                kind: StampKind::TreePine,
                priority: 4,
                grid_size: 20,
                jitter: 0.5,
                exclusion_radius: 4.0,
                variants: (0..3).map(|_| bake_pine(&mut rng, wood, leaves)).collect(),
            },
        ];
        types.sort_by_key(|t| t.priority);

        let max_radius = types
            .iter()
            .flat_map(|t| t.variants.iter().map(|v| v.radius()))
            .max()
            .unwrap_or(0);
        let max_exclusion = types
            .iter()
            .map(|t| t.exclusion_radius.ceil() as i32)
            .max()
            .unwrap_or(0);
        let max_wander = types
            .iter()
            .map(|t| (t.jitter * t.grid_size as f32).ceil() as i32)
            .max()
            .unwrap_or(0);

        Arc::new(StampLibrary {
            types,
            margin: max_radius + max_exclusion + max_wander,
        })
    }

    pub fn types(&self) -> &[StampType] {
        &self.types
    }

    /// How far outside a chunk placement scanning must look, in voxels.
    pub fn margin(&self) -> i32 {
        self.margin
    }
}

fn bake_oak(rng: &mut SmallRng, wood: u8, leaves: u8) -> Stamp {
    let trunk_height = rng.gen_range(5, 9);
    let canopy_radius = rng.gen_range(3, 5);
    let mut voxels = Vec::new();

    for y in 0..trunk_height {
        voxels.push(StampVoxel {
            offset: [0, y, 0],
            weight_bits: 15,
            material: wood,
        });
    }

    push_blob(
        &mut voxels,
        [0, trunk_height + canopy_radius - 2, 0],
        canopy_radius as f32,
        leaves,
    );
    Stamp::from_voxels(voxels)
}

fn bake_pine(rng: &mut SmallRng, wood: u8, leaves: u8) -> Stamp {
    let trunk_height = rng.gen_range(7, 12);
    let mut voxels = Vec::new();

    for y in 0..trunk_height {
        voxels.push(StampVoxel {
            offset: [0, y, 0],
            weight_bits: 15,
            material: wood,
        });
    }

    // stacked shrinking rings
    let mut radius = 3.0f32;
    let mut y = trunk_height - 4;
    while radius > 0.5 {
        push_blob(&mut voxels, [0, y, 0], radius, leaves);
        radius -= 0.8;
        y += 1;
    }
    Stamp::from_voxels(voxels)
}

fn bake_rock(rng: &mut SmallRng, stone: u8, radius_range: std::ops::Range<i32>) -> Stamp {
    let radius = rng.gen_range(radius_range.start, radius_range.end) as f32;
    let squash = rng.gen_range(0.5f32, 0.9);
    let mut voxels = Vec::new();

    let extent = radius.ceil() as i32;
    for dz in -extent..=extent {
        for dy in 0..=extent {
            for dx in -extent..=extent {
                let d = ((dx * dx + dz * dz) as f32 + (dy as f32 / squash).powi(2)).sqrt();
                let weight = (radius - d).max(-0.5).min(0.5);
                if weight <= -0.5 {
                    continue;
                }
                let bits = Voxel::pack(weight, stone, 0).weight_bits();
                if bits == 0 {
                    continue;
                }
                voxels.push(StampVoxel {
                    offset: [dx, dy, dz],
                    weight_bits: bits,
                    material: stone,
                });
            }
        }
    }
    Stamp::from_voxels(voxels)
}

fn bake_hut(rng: &mut SmallRng, brick: u8, wood: u8) -> Stamp {
    let half: i32 = rng.gen_range(3, 5);
    let height = rng.gen_range(4, 6);
    let mut voxels = Vec::new();

    for dz in -half..=half {
        for dy in 0..=height {
            for dx in -half..=half {
                let on_wall = dx.abs() == half || dz.abs() == half;
                let on_roof = dy == height;
                let is_door = dz == half && dx.abs() <= 1 && dy <= 2;
                if is_door || !(on_wall || on_roof) {
                    continue;
                }
                voxels.push(StampVoxel {
                    offset: [dx, dy, dz],
                    weight_bits: 15,
                    material: if on_roof { wood } else { brick },
                });
            }
        }
    }
    Stamp::from_voxels(voxels)
}

fn push_blob(voxels: &mut Vec<StampVoxel>, center: [i32; 3], radius: f32, material: u8) {
    let extent = radius.ceil() as i32;
    for dz in -extent..=extent {
        for dy in -extent..=extent {
            for dx in -extent..=extent {
                let d = ((dx * dx + dy * dy + dz * dz) as f32).sqrt();
                let weight = (radius - d).max(-0.5).min(0.5);
                let bits = Voxel::pack(weight, material, 0).weight_bits();
                if bits == 0 {
                    continue;
                }
                voxels.push(StampVoxel {
                    offset: [center[0] + dx, center[1] + dy, center[2] + dz],
                    weight_bits: bits,
                    material,
                });
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Placement {
    pub anchor: VoxelPos,
    pub type_index: usize,
    pub variant: usize,
    /// quarter turns around +Y
    pub rotation: u8,
}

fn rotate_offset(offset: [i32; 3], rotation: u8) -> [i32; 3] {
    let [dx, dy, dz] = offset;
    match rotation & 3 {
        0 => [dx, dy, dz],
        1 => [-dz, dy, dx],
        2 => [-dx, dy, -dz],
        _ => [dz, dy, -dx],
    }
}

// FNV-1a over the cell identity; must agree across platforms, so no
// std hasher here
fn cell_seed(world_seed: u32, gx: i32, gz: i32, kind: u8) -> u64 {
    const PRIME: u64 = 0x100000001b3;
    let mut hash = 0xcbf29ce484222325u64;
    for byte in world_seed
        .to_le_bytes()
        .iter()
        .chain(gx.to_le_bytes().iter())
        .chain(gz.to_le_bytes().iter())
        .chain(std::iter::once(&kind))
    {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub struct StampPlacer {
    seed: u32,
    library: Arc<StampLibrary>,
}

impl StampPlacer {
    pub fn new(seed: u32, library: Arc<StampLibrary>) -> Self {
        Self { seed, library }
    }

    pub fn library(&self) -> &Arc<StampLibrary> {
        &self.library
    }

    /// The jittered anchor XZ of a cell's attempt, straight from the cell
    /// hash; the rng comes back positioned for the variant/rotation draws.
    fn cell_attempt(&self, stamp_type: &StampType, gx: i32, gz: i32) -> (f32, f32, SmallRng) {
        let mut rng =
            SmallRng::seed_from_u64(cell_seed(self.seed, gx, gz, stamp_type.kind as u8));
        let grid = stamp_type.grid_size;
        let center_x = (gx * grid + grid / 2) as f32;
        let center_z = (gz * grid + grid / 2) as f32;
        let ax = center_x + stamp_type.jitter * rng.gen_range(-1.0f32, 1.0) * grid as f32;
        let az = center_z + stamp_type.jitter * rng.gen_range(-1.0f32, 1.0) * grid as f32;
        (ax, az, rng)
    }

    /// Whether the attempt of `stamp_type` at `(ax, az)` loses to another
    /// candidate attempt nearby. The check runs against *candidates*, never
    /// against accepted placements, so the outcome is a pure function of
    /// the seed and the position; a chunk can evaluate it without knowing
    /// what any other chunk placed. Lower priority wins; ties go to the
    /// lexicographically earlier cell.
    fn attempt_is_excluded(
        &self,
        type_index: usize,
        cell: (i32, i32),
        ax: f32,
        az: f32,
    ) -> bool {
        let stamp_type = &self.library.types[type_index];

        for (other_index, other) in self.library.types.iter().enumerate() {
            if other_index > type_index {
                break;
            }
            let exclusion = stamp_type.exclusion_radius.max(other.exclusion_radius);
            let reach = exclusion + other.jitter * other.grid_size as f32 + 1.0;

            let ogx_min = ((ax - reach).floor() as i32).div_euclid(other.grid_size);
            let ogx_max = ((ax + reach).ceil() as i32).div_euclid(other.grid_size);
            let ogz_min = ((az - reach).floor() as i32).div_euclid(other.grid_size);
            let ogz_max = ((az + reach).ceil() as i32).div_euclid(other.grid_size);

            for ogz in ogz_min..=ogz_max {
                for ogx in ogx_min..=ogx_max {
                    let same_type = other_index == type_index;
                    if same_type && (ogz, ogx) >= (cell.1, cell.0) {
                        continue;
                    }
                    let (ox, oz, _) = self.cell_attempt(other, ogx, ogz);
                    let (dx, dz) = (ax - ox, az - oz);
                    if dx * dx + dz * dz < exclusion * exclusion {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// All surviving placements whose stamps could intersect `chunk`.
    /// Placement depends only on (seed, world position), never on which
    /// chunk asked.
    pub fn placements_overlapping(
        &self,
        terrain: &TerrainGenerator,
        chunk: ChunkPos,
    ) -> Vec<Placement> {
        let origin = chunk.origin();
        let margin = self.library.margin;
        let min_x = origin.x - margin;
        let max_x = origin.x + CHUNK_LENGTH as i32 + margin;
        let min_z = origin.z - margin;
        let max_z = origin.z + CHUNK_LENGTH as i32 + margin;

        let mut placements = Vec::new();

        for (type_index, stamp_type) in self.library.types.iter().enumerate() {
            let grid = stamp_type.grid_size;
            let gx_min = min_x.div_euclid(grid);
            let gx_max = max_x.div_euclid(grid);
            let gz_min = min_z.div_euclid(grid);
            let gz_max = max_z.div_euclid(grid);

            for gz in gz_min..=gz_max {
                for gx in gx_min..=gx_max {
                    let (ax, az, mut rng) = self.cell_attempt(stamp_type, gx, gz);
                    if self.attempt_is_excluded(type_index, (gx, gz), ax, az) {
                        continue;
                    }

                    let variant =
                        (rng.gen::<f32>() * stamp_type.variants.len() as f32) as usize;
                    let rotation = rng.gen_range(0u8, 4);
                    let anchor_y = surface_voxel_y(terrain.sample_height(ax, az)) + 1;

                    placements.push(Placement {
                        anchor: VoxelPos::new([ax.floor() as i32, anchor_y, az.floor() as i32]),
                        type_index,
                        variant: variant.min(stamp_type.variants.len() - 1),
                        rotation,
                    });
                }
            }
        }

        placements
    }

    /// Blend every overlapping stamp into the chunk (max-weight blend).
    /// Returns whether anything changed.
    pub fn apply_to_chunk(&self, terrain: &TerrainGenerator, chunk: &mut Chunk) -> bool {
        let placements = self.placements_overlapping(terrain, chunk.pos());
        let origin = chunk.pos().origin();
        let mut changed = false;

        for placement in placements.iter() {
            let stamp =
                &self.library.types[placement.type_index].variants[placement.variant];

            for voxel in stamp.voxels() {
                let [dx, dy, dz] = rotate_offset(voxel.offset, placement.rotation);
                let world = placement.anchor.offset([dx, dy, dz]);
                let lx = world.x - origin.x;
                let ly = world.y - origin.y;
                let lz = world.z - origin.z;
                if lx < 0
                    || ly < 0
                    || lz < 0
                    || lx >= CHUNK_LENGTH as i32
                    || ly >= CHUNK_LENGTH as i32
                    || lz >= CHUNK_LENGTH as i32
                {
                    continue;
                }

                let (lx, ly, lz) = (lx as usize, ly as usize, lz as usize);
                let existing = chunk.get(lx, ly, lz);
                if voxel.weight_bits > existing.weight_bits() {
                    let blended = Voxel(
                        voxel.weight_bits << crate::voxel::WEIGHT_SHIFT
                            | (voxel.material as u16) << crate::voxel::MATERIAL_SHIFT
                            | existing.light() as u16,
                    );
                    changed |= chunk.set(lx, ly, lz, blended);
                }
            }
        }

        changed
    }
}
