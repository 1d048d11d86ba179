use std::ops::{Index, IndexMut};

use super::ChunkPos;
use crate::{
    voxel::{Voxel, AIR},
    Face, CHUNK_LENGTH, CHUNK_VOLUME,
};

/// Flat voxel index, x-fastest: `x + y * 32 + z * 1024`. This layout is part
/// of the wire and disk formats, both sides must agree on it.
#[inline(always)]
pub const fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    x + y * CHUNK_LENGTH + z * CHUNK_LENGTH * CHUNK_LENGTH
}

#[inline(always)]
pub const fn index_to_voxel(index: usize) -> [usize; 3] {
    [
        index % CHUNK_LENGTH,
        index / CHUNK_LENGTH % CHUNK_LENGTH,
        index / (CHUNK_LENGTH * CHUNK_LENGTH),
    ]
}

pub fn is_in_chunk_bounds(x: usize, y: usize, z: usize) -> bool {
    x < CHUNK_LENGTH && y < CHUNK_LENGTH && z < CHUNK_LENGTH
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArrayChunk {
    data: Box<[Voxel]>,
}

impl ArrayChunk {
    pub fn homogeneous(voxel: Voxel) -> Self {
        Self {
            data: vec![voxel; CHUNK_VOLUME].into_boxed_slice(),
        }
    }

    pub fn as_slice(&self) -> &[Voxel] {
        &self.data
    }
}

impl Index<[usize; 3]> for ArrayChunk {
    type Output = Voxel;

    fn index(&self, [x, y, z]: [usize; 3]) -> &Voxel {
        if is_in_chunk_bounds(x, y, z) {
            return &self.data[voxel_index(x, y, z)];
        }

        panic!(
            "chunk index out of bounds: the size is {} but the index is ({}, {}, {})",
            CHUNK_LENGTH, x, y, z
        )
    }
}

impl IndexMut<[usize; 3]> for ArrayChunk {
    fn index_mut(&mut self, [x, y, z]: [usize; 3]) -> &mut Voxel {
        if is_in_chunk_bounds(x, y, z) {
            return &mut self.data[voxel_index(x, y, z)];
        }

        panic!(
            "chunk index out of bounds: the size is {} but the index is ({}, {}, {})",
            CHUNK_LENGTH, x, y, z
        )
    }
}

#[derive(Debug)]
pub struct ChunkTryFromError {
    provided_size: usize,
    expected_size: usize,
}

impl std::error::Error for ChunkTryFromError {}
impl std::fmt::Display for ChunkTryFromError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not convert slice to array chunk: mismatched sizes: expected {}, got {}",
            self.expected_size, self.provided_size
        )
    }
}

impl TryFrom<Box<[Voxel]>> for ArrayChunk {
    type Error = ChunkTryFromError;

    fn try_from(data: Box<[Voxel]>) -> Result<Self, Self::Error> {
        if data.len() != CHUNK_VOLUME {
            return Err(ChunkTryFromError {
                provided_size: data.len(),
                expected_size: CHUNK_VOLUME,
            });
        }

        Ok(ArrayChunk { data })
    }
}

/// Voxel payload of a chunk. Untouched terrain is frequently all-air or
/// all-stone, so homogeneous fills stay a single value until the first
/// differing write promotes them to a full array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkData {
    Homogeneous(Voxel),
    Array(ArrayChunk),
}

impl ChunkData {
    #[inline]
    pub fn get(&self, index: [usize; 3]) -> Voxel {
        match self {
            &ChunkData::Homogeneous(voxel) => voxel,
            ChunkData::Array(data) => data[index],
        }
    }

    pub fn is_homogeneous(&self) -> Option<Voxel> {
        match self {
            &ChunkData::Homogeneous(voxel) => Some(voxel),
            ChunkData::Array(_) => None,
        }
    }
}

/// Which of the six face-adjacent neighbor chunks are affected by a set of
/// writes, because a boundary voxel changed. Consumers re-mesh those.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct BoundaryTouch(u8);

impl BoundaryTouch {
    pub fn touch(&mut self, face: Face) {
        self.0 |= 1 << face.id();
    }

    pub fn contains(self, face: Face) -> bool {
        self.0 & 1 << face.id() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn merge(&mut self, other: BoundaryTouch) {
        self.0 |= other.0;
    }
}

pub struct Chunk {
    pos: ChunkPos,
    data: ChunkData,
    last_build_seq: u32,
}

impl Chunk {
    pub fn new(pos: ChunkPos, data: ChunkData) -> Self {
        Self {
            pos,
            data,
            last_build_seq: 0,
        }
    }

    pub fn empty(pos: ChunkPos) -> Self {
        Self::new(pos, ChunkData::Homogeneous(AIR))
    }

    /// Flat terrain up to (and excluding) `height` voxels, used all over the
    /// tests.
    pub fn flat(pos: ChunkPos, height: i32, material: u8) -> Self {
        let base = pos.origin().y;
        let mut chunk = Self::empty(pos);
        if base + CHUNK_LENGTH as i32 <= height {
            chunk.fill(Voxel::pack(0.5, material, 0));
            return chunk;
        }
        if base >= height {
            return chunk;
        }

        for z in 0..CHUNK_LENGTH {
            for y in 0..CHUNK_LENGTH {
                let wy = base + y as i32;
                if wy >= height {
                    continue;
                }
                for x in 0..CHUNK_LENGTH {
                    chunk.set(x, y, z, Voxel::pack(0.5, material, 0));
                }
            }
        }
        chunk
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    pub fn into_data(self) -> ChunkData {
        self.data
    }

    pub fn last_build_seq(&self) -> u32 {
        self.last_build_seq
    }

    pub fn set_last_build_seq(&mut self, seq: u32) {
        self.last_build_seq = self.last_build_seq.max(seq);
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Voxel {
        self.data.get([x, y, z])
    }

    /// Write one voxel, promoting a homogeneous fill on the first differing
    /// write. Returns whether anything changed.
    pub fn set(&mut self, x: usize, y: usize, z: usize, voxel: Voxel) -> bool {
        match &mut self.data {
            ChunkData::Homogeneous(current) => {
                if *current == voxel {
                    return false;
                }
                let mut array = ArrayChunk::homogeneous(*current);
                array[[x, y, z]] = voxel;
                self.data = ChunkData::Array(array);
                true
            }
            ChunkData::Array(data) => {
                let slot = &mut data[[x, y, z]];
                if *slot == voxel {
                    return false;
                }
                *slot = voxel;
                true
            }
        }
    }

    pub fn fill(&mut self, voxel: Voxel) {
        self.data = ChunkData::Homogeneous(voxel);
    }

    pub fn is_all_air(&self) -> bool {
        match &self.data {
            ChunkData::Homogeneous(voxel) => !voxel.is_solid(),
            ChunkData::Array(data) => !data.as_slice().iter().any(|voxel| voxel.is_solid()),
        }
    }

    pub fn has_any_solid(&self) -> bool {
        !self.is_all_air()
    }

    /// Which neighbors a write at the given local coordinates spills into,
    /// visually: a changed boundary voxel shifts surface geometry in the
    /// face-adjacent chunk too.
    pub fn boundary_touch(x: usize, y: usize, z: usize) -> BoundaryTouch {
        const MAX: usize = CHUNK_LENGTH - 1;
        let mut touch = BoundaryTouch::default();
        if x == 0 {
            touch.touch(Face::NegX);
        }
        if x == MAX {
            touch.touch(Face::PosX);
        }
        if y == 0 {
            touch.touch(Face::NegY);
        }
        if y == MAX {
            touch.touch(Face::PosY);
        }
        if z == 0 {
            touch.touch(Face::NegZ);
        }
        if z == MAX {
            touch.touch(Face::PosZ);
        }
        touch
    }

    /// Expand into a dense `u16` grid (the wire and disk representation).
    pub fn to_dense(&self) -> Box<[u16]> {
        match &self.data {
            &ChunkData::Homogeneous(voxel) => vec![voxel.bits(); CHUNK_VOLUME].into_boxed_slice(),
            ChunkData::Array(data) => data
                .as_slice()
                .iter()
                .map(|voxel| voxel.bits())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Rebuild from a dense grid, re-collapsing homogeneous data.
    pub fn from_dense(pos: ChunkPos, dense: &[u16]) -> Result<Self, ChunkTryFromError> {
        if dense.len() != CHUNK_VOLUME {
            return Err(ChunkTryFromError {
                provided_size: dense.len(),
                expected_size: CHUNK_VOLUME,
            });
        }

        let first = dense[0];
        let data = if dense.iter().all(|&bits| bits == first) {
            ChunkData::Homogeneous(Voxel(first))
        } else {
            let voxels = dense.iter().map(|&bits| Voxel(bits)).collect::<Vec<_>>();
            ChunkData::Array(ArrayChunk::try_from(voxels.into_boxed_slice())?)
        };
        Ok(Self::new(pos, data))
    }
}

/// The three `+`-side neighbors the mesher samples through
/// [`get_with_margin`]. An absent neighbor clamps to the local boundary.
#[derive(Default)]
pub struct HighNeighbors<'a> {
    pub pos_x: Option<&'a Chunk>,
    pub pos_y: Option<&'a Chunk>,
    pub pos_z: Option<&'a Chunk>,
}

impl<'a> HighNeighbors<'a> {
    pub fn missing_mask(&self) -> [bool; 3] {
        [
            self.pos_x.is_none(),
            self.pos_y.is_none(),
            self.pos_z.is_none(),
        ]
    }
}

/// Read a voxel from the expanded grid the mesher works on: local indices in
/// `0..34` per axis, where indices >= 32 sample the `+` neighbor along that
/// axis (at `index - 32`), clamping to the local boundary voxel when the
/// neighbor is absent.
///
/// Only one axis may be out of local bounds at a time; edge- and
/// corner-diagonal margins fall back to clamped local reads, which is
/// exactly the extrapolation policy the stitched mesher expects.
pub fn get_with_margin(chunk: &Chunk, x: usize, y: usize, z: usize, neighbors: &HighNeighbors) -> Voxel {
    const MAX: usize = CHUNK_LENGTH - 1;
    let over_x = x >= CHUNK_LENGTH;
    let over_y = y >= CHUNK_LENGTH;
    let over_z = z >= CHUNK_LENGTH;

    match (over_x, over_y, over_z) {
        (false, false, false) => chunk.get(x, y, z),
        (true, false, false) => match neighbors.pos_x {
            Some(neighbor) => neighbor.get(x - CHUNK_LENGTH, y, z),
            None => chunk.get(MAX, y, z),
        },
        (false, true, false) => match neighbors.pos_y {
            Some(neighbor) => neighbor.get(x, y - CHUNK_LENGTH, z),
            None => chunk.get(x, MAX, z),
        },
        (false, false, true) => match neighbors.pos_z {
            Some(neighbor) => neighbor.get(x, y, z - CHUNK_LENGTH),
            None => chunk.get(x, y, MAX),
        },
        _ => {
            // diagonal margin: prefer any one present neighbor, clamping the
            // other overflowing axes to its boundary
            if over_x {
                if let Some(neighbor) = neighbors.pos_x {
                    return neighbor.get(x - CHUNK_LENGTH, y.min(MAX), z.min(MAX));
                }
            }
            if over_y {
                if let Some(neighbor) = neighbors.pos_y {
                    return neighbor.get(x.min(MAX), y - CHUNK_LENGTH, z.min(MAX));
                }
            }
            if over_z {
                if let Some(neighbor) = neighbors.pos_z {
                    return neighbor.get(x.min(MAX), y.min(MAX), z - CHUNK_LENGTH);
                }
            }
            chunk.get(x.min(MAX), y.min(MAX), z.min(MAX))
        }
    }
}
