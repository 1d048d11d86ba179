use nalgebra::{vector, Vector3};

pub mod build;
pub mod gen;
pub mod material;
pub mod mesh;
pub mod net;
pub mod util;
pub mod voxel;
pub mod world;

pub mod math {
    pub use nalgebra::{Matrix3, Matrix4, Point2, Point3, Quaternion, UnitQuaternion, Vector2, Vector3, Vector4};
}

pub mod prelude {
    pub use super::util;

    pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
    pub use anyhow::{anyhow, bail};

    pub use nalgebra::{point, vector};
}

/// The width of a chunk is `2 ^ CHUNK_LENGTH_BITS`.
pub const CHUNK_LENGTH_BITS: usize = 5;

pub const CHUNK_LENGTH: usize = 1 << CHUNK_LENGTH_BITS;
pub const CHUNK_AREA: usize = CHUNK_LENGTH * CHUNK_LENGTH;
pub const CHUNK_VOLUME: usize = CHUNK_LENGTH * CHUNK_LENGTH * CHUNK_LENGTH;

/// Edge length of one voxel in meters.
pub const VOXEL_SCALE: f32 = 0.25;

/// Edge length of one chunk in meters.
pub const CHUNK_WORLD_SIZE: f32 = CHUNK_LENGTH as f32 * VOXEL_SCALE;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

/// Six faces of a chunk. The discriminants are the face ids used by the
/// visibility graph's face-pair ranking, so they must stay dense and stable.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Face {
    /// Positive X.
    PosX = 0,
    /// Negative X.
    NegX = 1,
    /// Positive Y.
    PosY = 2,
    /// Negative Y.
    NegY = 3,
    /// Positive Z.
    PosZ = 4,
    /// Negative Z.
    NegZ = 5,
}

pub const ALL_FACES: [Face; 6] = [
    Face::PosX,
    Face::NegX,
    Face::PosY,
    Face::NegY,
    Face::PosZ,
    Face::NegZ,
];

impl Face {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Face> {
        ALL_FACES.get(id as usize).copied()
    }

    pub fn facing_positive(self) -> bool {
        matches!(self, Face::PosX | Face::PosY | Face::PosZ)
    }

    pub fn axis(self) -> Axis {
        match self {
            Face::PosX | Face::NegX => Axis::X,
            Face::PosY | Face::NegY => Axis::Y,
            Face::PosZ | Face::NegZ => Axis::Z,
        }
    }

    pub fn opposite(self) -> Face {
        match self {
            Face::PosX => Face::NegX,
            Face::NegX => Face::PosX,
            Face::PosY => Face::NegY,
            Face::NegY => Face::PosY,
            Face::PosZ => Face::NegZ,
            Face::NegZ => Face::PosZ,
        }
    }

    pub fn offset(self) -> [i32; 3] {
        match self {
            Face::PosX => [1, 0, 0],
            Face::NegX => [-1, 0, 0],
            Face::PosY => [0, 1, 0],
            Face::NegY => [0, -1, 0],
            Face::PosZ => [0, 0, 1],
            Face::NegZ => [0, 0, -1],
        }
    }

    pub fn normal(self) -> Vector3<f32> {
        let [x, y, z] = self.offset();
        vector![x as f32, y as f32, z as f32]
    }

    pub fn enumerate<F>(mut func: F)
    where
        F: FnMut(Face),
    {
        for &face in ALL_FACES.iter() {
            func(face);
        }
    }
}
