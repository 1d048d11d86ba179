//! Per-chunk visibility graphs.
//!
//! Each chunk carries 15 bits, one per unordered pair of its six faces. A
//! bit is set when a 6-connected path of non-solid voxels links the two
//! faces of the pair, which is what lets the renderer's chunk-graph BFS
//! decide whether a view ray can pass *through* a chunk from one face to
//! another.

use std::collections::VecDeque;

use super::chunk::{index_to_voxel, voxel_index, Chunk, ChunkData};
use crate::{Face, ALL_FACES, CHUNK_LENGTH, CHUNK_VOLUME};

pub const FACE_PAIR_COUNT: usize = 15;

/// All face pairs connected: the fully-empty chunk.
pub const ALL_PAIRS: u16 = 0x7fff;

/// Lexicographic rank of the unordered pair `(min, max)` over the 6 face
/// ids; the bit index used by [`VisibilityGraph`].
pub fn face_pair_index(a: Face, b: Face) -> usize {
    debug_assert!(a != b);
    let (lo, hi) = if a.id() < b.id() {
        (a.id() as usize, b.id() as usize)
    } else {
        (b.id() as usize, a.id() as usize)
    };
    // pairs (0,1) (0,2) ... (0,5) (1,2) ... (4,5)
    lo * 5 - lo * (lo + 1) / 2 + hi - 1
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct VisibilityGraph(u16);

impl VisibilityGraph {
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & ALL_PAIRS)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn fully_open() -> Self {
        Self(ALL_PAIRS)
    }

    pub fn fully_closed() -> Self {
        Self(0)
    }

    pub fn can_see_through(self, a: Face, b: Face) -> bool {
        self.0 & 1 << face_pair_index(a, b) != 0
    }
}

/// Reusable flood-fill state. The `visited` buffer is generation-counted so
/// repeated computations never re-clear 32k entries.
pub struct VisibilityScratch {
    visited: Box<[u32]>,
    generation: u32,
    queue: VecDeque<u32>,
}

impl Default for VisibilityScratch {
    fn default() -> Self {
        Self {
            visited: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            generation: 0,
            queue: VecDeque::new(),
        }
    }
}

fn boundary_faces(x: usize, y: usize, z: usize) -> impl Iterator<Item = Face> {
    const MAX: usize = CHUNK_LENGTH - 1;
    ALL_FACES.into_iter().filter(move |face| match face {
        Face::PosX => x == MAX,
        Face::NegX => x == 0,
        Face::PosY => y == MAX,
        Face::NegY => y == 0,
        Face::PosZ => z == MAX,
        Face::NegZ => z == 0,
    })
}

pub fn compute_visibility(chunk: &Chunk, scratch: &mut VisibilityScratch) -> VisibilityGraph {
    match chunk.data() {
        ChunkData::Homogeneous(voxel) if voxel.is_solid() => return VisibilityGraph::fully_closed(),
        ChunkData::Homogeneous(_) => return VisibilityGraph::fully_open(),
        ChunkData::Array(_) => {}
    }

    scratch.generation = scratch.generation.wrapping_add(1);
    if scratch.generation == 0 {
        // the counter lapped; all stale marks must go
        scratch.visited.iter_mut().for_each(|slot| *slot = 0);
        scratch.generation = 1;
    }
    let generation = scratch.generation;

    let mut bits = 0u16;

    const MAX: usize = CHUNK_LENGTH - 1;
    for index in 0..CHUNK_VOLUME {
        let [x, y, z] = index_to_voxel(index);
        // flood fills start from unvisited non-solid boundary voxels only;
        // interior pockets never reach a face so they cannot set bits
        if x != 0 && x != MAX && y != 0 && y != MAX && z != 0 && z != MAX {
            continue;
        }
        if scratch.visited[index] == generation || chunk.get(x, y, z).is_solid() {
            continue;
        }

        let mut reached = 0u8;
        scratch.queue.clear();
        scratch.queue.push_back(index as u32);
        scratch.visited[index] = generation;

        while let Some(current) = scratch.queue.pop_front() {
            let [x, y, z] = index_to_voxel(current as usize);
            for face in boundary_faces(x, y, z) {
                reached |= 1 << face.id();
            }

            let mut visit = |x: usize, y: usize, z: usize| {
                let neighbor = voxel_index(x, y, z);
                if scratch.visited[neighbor] != generation && !chunk.get(x, y, z).is_solid() {
                    scratch.visited[neighbor] = generation;
                    scratch.queue.push_back(neighbor as u32);
                }
            };

            if x > 0 {
                visit(x - 1, y, z);
            }
            if x < MAX {
                visit(x + 1, y, z);
            }
            if y > 0 {
                visit(x, y - 1, z);
            }
            if y < MAX {
                visit(x, y + 1, z);
            }
            if z > 0 {
                visit(x, y, z - 1);
            }
            if z < MAX {
                visit(x, y, z + 1);
            }
        }

        for (i, &a) in ALL_FACES.iter().enumerate() {
            if reached & 1 << a.id() == 0 {
                continue;
            }
            for &b in ALL_FACES.iter().skip(i + 1) {
                if reached & 1 << b.id() != 0 {
                    bits |= 1 << face_pair_index(a, b);
                }
            }
        }

        if bits == ALL_PAIRS {
            break;
        }
    }

    VisibilityGraph::from_bits(bits)
}
