//! The shared world model: positions, chunks, map tiles, visibility graphs
//! and lighting. Coordinate spaces, from coarse to fine:
//!
//! - `ChunkPos` — integer chunk grid, one step is `CHUNK_WORLD_SIZE` meters.
//! - `TilePos` — a chunk *column*, i.e. a `ChunkPos` with the y collapsed.
//! - `VoxelPos` — integer world-voxel grid, one step is `VOXEL_SCALE` meters.
//! - `Point3<f32>` — world meters.

use nalgebra::Point3;
use std::fmt;
use std::str::FromStr;

use crate::{prelude::*, CHUNK_LENGTH, VOXEL_SCALE};

pub mod chunk;
pub mod lighting;
pub mod tile;
pub mod visibility;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TilePos {
    pub x: i32,
    pub z: i32,
}

/// Integer world-voxel coordinates.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VoxelPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new<I: Into<[i32; 3]>>(pos: I) -> Self {
        let [x, y, z] = pos.into();
        Self { x, y, z }
    }

    pub fn offset<I: Into<[i32; 3]>>(self, offset: I) -> Self {
        let [dx, dy, dz] = offset.into();
        Self {
            x: dx + self.x,
            y: dy + self.y,
            z: dz + self.z,
        }
    }

    pub fn column(self) -> TilePos {
        TilePos {
            x: self.x,
            z: self.z,
        }
    }

    /// World-voxel coordinates of this chunk's origin voxel.
    pub fn origin(self) -> VoxelPos {
        VoxelPos {
            x: CHUNK_LENGTH as i32 * self.x,
            y: CHUNK_LENGTH as i32 * self.y,
            z: CHUNK_LENGTH as i32 * self.z,
        }
    }

    /// World-space position of this chunk's origin corner, in meters.
    pub fn origin_world(self) -> Point3<f32> {
        self.origin().origin_world()
    }

    pub fn chebyshev_distance(self, other: ChunkPos) -> i32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }
}

impl TilePos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn chunk(self, y: i32) -> ChunkPos {
        ChunkPos {
            x: self.x,
            y,
            z: self.z,
        }
    }

    pub fn chebyshev_distance(self, other: TilePos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

impl VoxelPos {
    pub fn new<I: Into<[i32; 3]>>(pos: I) -> Self {
        let [x, y, z] = pos.into();
        Self { x, y, z }
    }

    pub fn offset<I: Into<[i32; 3]>>(self, offset: I) -> Self {
        let [dx, dy, dz] = offset.into();
        Self {
            x: dx + self.x,
            y: dy + self.y,
            z: dz + self.z,
        }
    }

    /// World-space position of this voxel's low corner, in meters.
    pub fn origin_world(self) -> Point3<f32> {
        point![
            self.x as f32 * VOXEL_SCALE,
            self.y as f32 * VOXEL_SCALE,
            self.z as f32 * VOXEL_SCALE
        ]
    }

    /// World-space position of this voxel's center, in meters.
    pub fn center_world(self) -> Point3<f32> {
        point![
            (self.x as f32 + 0.5) * VOXEL_SCALE,
            (self.y as f32 + 0.5) * VOXEL_SCALE,
            (self.z as f32 + 0.5) * VOXEL_SCALE
        ]
    }

    pub fn chunk_and_offset(self) -> (ChunkPos, [usize; 3]) {
        let chunk = ChunkPos::from(self);
        let base = chunk.origin();
        let offset = [
            (self.x - base.x) as usize,
            (self.y - base.y) as usize,
            (self.z - base.z) as usize,
        ];
        (chunk, offset)
    }
}

impl From<VoxelPos> for ChunkPos {
    fn from(pos: VoxelPos) -> Self {
        ChunkPos {
            x: pos.x.div_euclid(CHUNK_LENGTH as i32),
            y: pos.y.div_euclid(CHUNK_LENGTH as i32),
            z: pos.z.div_euclid(CHUNK_LENGTH as i32),
        }
    }
}

/// World meters to the containing voxel.
pub fn world_to_voxel(pos: Point3<f32>) -> VoxelPos {
    VoxelPos {
        x: (pos.x / VOXEL_SCALE).floor() as i32,
        y: (pos.y / VOXEL_SCALE).floor() as i32,
        z: (pos.z / VOXEL_SCALE).floor() as i32,
    }
}

/// World meters to the containing chunk.
pub fn world_to_chunk(pos: Point3<f32>) -> ChunkPos {
    world_to_voxel(pos).into()
}

// chunk keys are the store and wire identity of a chunk, so the format is
// load-bearing: "cx,cy,cz"
impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

impl FromStr for ChunkPos {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(|part| part.trim().parse::<i32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(ChunkPos { x, y, z }),
            _ => bail!("malformed chunk key '{}'", s),
        }
    }
}

impl FromStr for TilePos {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(|part| part.trim().parse::<i32>());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(z)), None) => Ok(TilePos { x, z }),
            _ => bail!("malformed tile key '{}'", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_round_trips_through_its_origin() {
        for &pos in &[
            ChunkPos::new([0, 0, 0]),
            ChunkPos::new([1, -2, 3]),
            ChunkPos::new([-7, 40, -1]),
        ] {
            assert_eq!(ChunkPos::from(pos.origin()), pos);
            assert_eq!(world_to_chunk(pos.origin_world()), pos);
        }
    }

    #[test]
    fn voxel_chunk_and_offset_round_trips() {
        let pos = VoxelPos::new([-1, 33, 70]);
        let (chunk, [lx, ly, lz]) = pos.chunk_and_offset();
        assert_eq!(chunk, ChunkPos::new([-1, 1, 2]));
        assert_eq!([lx, ly, lz], [31, 1, 6]);
        assert_eq!(
            chunk.origin().offset([lx as i32, ly as i32, lz as i32]),
            pos
        );
    }

    #[test]
    fn chunk_keys_parse_back() {
        let pos = ChunkPos::new([-3, 0, 17]);
        assert_eq!(pos.to_string(), "-3,0,17");
        assert_eq!(pos.to_string().parse::<ChunkPos>().unwrap(), pos);
        assert!("1,2".parse::<ChunkPos>().is_err());
        assert!("a,b,c".parse::<ChunkPos>().is_err());

        let tile = TilePos::new(5, -9);
        assert_eq!(tile.to_string().parse::<TilePos>().unwrap(), tile);
    }

    #[test]
    fn world_to_voxel_floors_negative_coordinates() {
        let pos = world_to_voxel(point![-0.1, 0.1, -0.26]);
        assert_eq!(pos, VoxelPos::new([-1, 0, -2]));
    }
}
