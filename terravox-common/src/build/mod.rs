//! Build operations: what a player asks the world to do. The server
//! validates these and both sides apply them through [`draw`], so a commit
//! replays identically everywhere.

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::world::{world_to_voxel, ChunkPos, VoxelPos};

pub mod draw;
pub mod sdf;

pub use sdf::BuildShape;

/// Players may not build farther than this from their own position, in
/// meters.
pub const MAX_BUILD_DISTANCE: f32 = 20.0;

/// Upper bound for each axis of a build's size, in meters.
pub const MAX_BUILD_SIZE: f32 = 20.0;

/// Minimum interval between accepted builds per player.
pub const BUILD_MIN_INTERVAL_MS: u64 = 100;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildMode {
    Add = 0,
    Subtract = 1,
    Paint = 2,
    Fill = 3,
}

impl BuildMode {
    pub fn from_id(id: u8) -> Option<BuildMode> {
        match id {
            0 => Some(BuildMode::Add),
            1 => Some(BuildMode::Subtract),
            2 => Some(BuildMode::Paint),
            3 => Some(BuildMode::Fill),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildConfig {
    pub shape: BuildShape,
    pub mode: BuildMode,
    /// full extent per axis, meters
    pub size: Vector3<f32>,
    pub material: u8,
    pub thickness: Option<f32>,
    pub closed: bool,
    pub arc_sweep: Option<f32>,
}

impl BuildConfig {
    pub fn solid(shape: BuildShape, mode: BuildMode, size: Vector3<f32>, material: u8) -> Self {
        Self {
            shape,
            mode,
            size,
            material,
            thickness: None,
            closed: true,
            arc_sweep: None,
        }
    }

    /// Structural sanity only; registry and distance checks live in the
    /// server's build handler.
    pub fn is_size_valid(&self) -> bool {
        [self.size.x, self.size.y, self.size.z]
            .iter()
            .all(|&axis| axis > 0.0 && axis <= MAX_BUILD_SIZE && axis.is_finite())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildOperation {
    /// world meters
    pub center: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub config: BuildConfig,
}

impl BuildOperation {
    /// Conservative world-voxel bounds of everything this operation can
    /// touch: `center ± (max half extent + 2 voxels)`, rotation-safe because
    /// it uses the diagonal.
    pub fn voxel_bounds(&self) -> (VoxelPos, VoxelPos) {
        let half = self.config.size * 0.5;
        let reach = (half.x * half.x + half.y * half.y + half.z * half.z).sqrt()
            + 2.0 * crate::VOXEL_SCALE;
        let min = world_to_voxel(self.center - Vector3::repeat(reach));
        let max = world_to_voxel(self.center + Vector3::repeat(reach));
        (min, max)
    }

    /// Chunks whose voxels the operation may modify.
    pub fn affected_chunks(&self) -> Vec<ChunkPos> {
        let (min, max) = self.voxel_bounds();
        let min_chunk = ChunkPos::from(min);
        let max_chunk = ChunkPos::from(max);

        let mut chunks = Vec::new();
        for cz in min_chunk.z..=max_chunk.z {
            for cy in min_chunk.y..=max_chunk.y {
                for cx in min_chunk.x..=max_chunk.x {
                    chunks.push(ChunkPos::new([cx, cy, cz]));
                }
            }
        }
        chunks
    }
}

/// Outcome of a build intent; only `Success` advances the room's build seq.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildResult {
    Success = 0,
    RateLimited = 1,
    TooFar = 2,
    InvalidConfig = 3,
    InvalidMaterial = 4,
    TerrainNotReady = 5,
}

impl BuildResult {
    pub fn is_success(self) -> bool {
        matches!(self, BuildResult::Success)
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One committed build, as remembered by a room's bounded log.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildLogEntry {
    pub build_seq: u32,
    pub player_id: u16,
    pub op: BuildOperation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{point, vector};

    #[test]
    fn size_validation_rejects_degenerate_axes() {
        let mut config = BuildConfig::solid(
            BuildShape::Cube,
            BuildMode::Add,
            vector![1.0, 1.0, 1.0],
            1,
        );
        assert!(config.is_size_valid());

        config.size.y = 0.0;
        assert!(!config.is_size_valid());
        config.size.y = -2.0;
        assert!(!config.is_size_valid());
        config.size.y = MAX_BUILD_SIZE + 0.1;
        assert!(!config.is_size_valid());
        config.size.y = f32::NAN;
        assert!(!config.is_size_valid());
    }

    #[test]
    fn affected_chunks_cover_the_operation() {
        let op = BuildOperation {
            center: point![4.0, 4.0, 4.0],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Cube,
                BuildMode::Add,
                vector![2.0, 2.0, 2.0],
                1,
            ),
        };

        let chunks = op.affected_chunks();
        // center (4m, 4m, 4m) is voxel (16, 16, 16) in chunk (0, 0, 0);
        // reach stays well inside the 8m chunk
        assert!(chunks.contains(&ChunkPos::new([0, 0, 0])));
        for chunk in chunks {
            assert!(chunk.x.abs() <= 1 && chunk.y.abs() <= 1 && chunk.z.abs() <= 1);
        }
    }

    #[test]
    fn operations_near_boundaries_span_chunks() {
        let op = BuildOperation {
            center: point![8.0, 4.0, 4.0],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Sphere,
                BuildMode::Add,
                vector![2.0, 2.0, 2.0],
                1,
            ),
        };
        let chunks = op.affected_chunks();
        assert!(chunks.contains(&ChunkPos::new([0, 0, 0])));
        assert!(chunks.contains(&ChunkPos::new([1, 0, 0])));
    }
}
