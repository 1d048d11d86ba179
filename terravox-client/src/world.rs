//! The client's chunk cache and its bookkeeping: build-seq dominance over
//! server chunk data, local replay of build commits, lazy per-chunk
//! visibility graphs, lighting seeds, and the chunk-graph BFS that decides
//! which loaded chunks are worth drawing.

use nalgebra::Vector3;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use terravox_common::{
    build::{draw::draw_operation_outcome, BuildOperation},
    material::MaterialRegistry,
    world::{
        chunk::{Chunk, HighNeighbors},
        lighting::{compute_sunlight_columns, propagate_light, LightScratch},
        visibility::{compute_visibility, VisibilityGraph, VisibilityScratch},
        ChunkPos,
    },
    Face, ALL_FACES,
};

struct ClientChunk {
    chunk: Chunk,
    visibility: Option<VisibilityGraph>,
    meshed: bool,
}

/// Chunks waiting for a re-mesh, oldest edit first. However many edits land
/// on a chunk before the mesher gets to it, it waits in line exactly once;
/// a chunk that unloads mid-wait is forgotten.
#[derive(Default)]
struct MeshQueue {
    order: VecDeque<ChunkPos>,
    queued: HashSet<ChunkPos>,
}

impl MeshQueue {
    fn enqueue(&mut self, pos: ChunkPos) {
        if self.queued.insert(pos) {
            self.order.push_back(pos);
        }
    }

    fn next(&mut self) -> Option<ChunkPos> {
        let pos = self.order.pop_front()?;
        self.queued.remove(&pos);
        Some(pos)
    }

    fn forget(&mut self, pos: ChunkPos) {
        if self.queued.remove(&pos) {
            self.order.retain(|waiting| *waiting != pos);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct ClientWorld {
    registry: Arc<MaterialRegistry>,
    chunks: HashMap<ChunkPos, ClientChunk>,
    /// bottom-row sunlight emitted by each lit chunk, seed for the chunk
    /// below
    light_seeds: HashMap<ChunkPos, Box<[u8]>>,
    needs_mesh: MeshQueue,
    visibility_scratch: VisibilityScratch,
    light_scratch: LightScratch,
}

impl ClientWorld {
    pub fn new(registry: Arc<MaterialRegistry>) -> Self {
        Self {
            registry,
            chunks: HashMap::new(),
            light_seeds: HashMap::new(),
            needs_mesh: MeshQueue::default(),
            visibility_scratch: VisibilityScratch::default(),
            light_scratch: LightScratch::default(),
        }
    }

    pub fn registry(&self) -> &Arc<MaterialRegistry> {
        &self.registry
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos).map(|entry| &entry.chunk)
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn loaded_positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.chunks.keys().copied()
    }

    pub fn is_meshed(&self, pos: ChunkPos) -> bool {
        self.chunks.get(&pos).map_or(false, |entry| entry.meshed)
    }

    /// Apply CHUNK_DATA (or a surface-column member). A server chunk older
    /// than what local build replay already produced is ignored.
    pub fn apply_chunk_data(&mut self, pos: ChunkPos, last_build_seq: u32, voxels: &[u16]) -> bool {
        if let Some(existing) = self.chunks.get(&pos) {
            if existing.chunk.last_build_seq() > last_build_seq {
                log::debug!(
                    "ignoring stale chunk {} (server seq {}, local {})",
                    pos,
                    last_build_seq,
                    existing.chunk.last_build_seq()
                );
                return false;
            }
        }

        let mut chunk = match Chunk::from_dense(pos, voxels) {
            Ok(chunk) => chunk,
            Err(err) => {
                log::error!("rejecting malformed chunk {}: {}", pos, err);
                return false;
            }
        };
        chunk.set_last_build_seq(last_build_seq);
        self.chunks.insert(
            pos,
            ClientChunk {
                chunk,
                visibility: None,
                meshed: false,
            },
        );
        self.invalidate_around(pos);
        true
    }

    /// Replay a BUILD_COMMIT on every loaded chunk it touches. Re-meshes
    /// the modified chunks, plus just the neighbors their boundary voxels
    /// spill into.
    pub fn apply_build_commit(&mut self, build_seq: u32, op: &BuildOperation) {
        for pos in op.affected_chunks() {
            let entry = match self.chunks.get_mut(&pos) {
                Some(entry) => entry,
                None => continue,
            };
            if entry.chunk.last_build_seq() >= build_seq {
                continue;
            }
            entry.chunk.set_last_build_seq(build_seq);
            let outcome = draw_operation_outcome(&mut entry.chunk, op);
            if !outcome.changed {
                continue;
            }
            entry.visibility = None;
            self.request_mesh(pos);
            for face in ALL_FACES {
                if !outcome.boundary.contains(face) {
                    continue;
                }
                let neighbor = pos.offset(face.offset());
                if self.chunks.contains_key(&neighbor) {
                    self.request_mesh(neighbor);
                }
            }
        }
    }

    pub fn remove_chunk(&mut self, pos: ChunkPos) {
        self.chunks.remove(&pos);
        self.light_seeds.remove(&pos);
        self.needs_mesh.forget(pos);
    }

    /// Queue a chunk and its face neighbors for re-mesh; surface geometry
    /// near a boundary lives in both chunks.
    fn invalidate_around(&mut self, pos: ChunkPos) {
        self.request_mesh(pos);
        for face in ALL_FACES {
            let neighbor = pos.offset(face.offset());
            if self.chunks.contains_key(&neighbor) {
                self.request_mesh(neighbor);
            }
        }
    }

    pub fn request_mesh(&mut self, pos: ChunkPos) {
        if let Some(entry) = self.chunks.get_mut(&pos) {
            entry.meshed = false;
            self.needs_mesh.enqueue(pos);
        }
    }

    pub fn mark_meshed(&mut self, pos: ChunkPos) {
        if let Some(entry) = self.chunks.get_mut(&pos) {
            entry.meshed = true;
        }
    }

    /// Next chunk waiting for a mesh, if any.
    pub fn pop_mesh_request(&mut self) -> Option<ChunkPos> {
        while let Some(pos) = self.needs_mesh.next() {
            if self.chunks.contains_key(&pos) {
                return Some(pos);
            }
        }
        None
    }

    pub fn mesh_queue_len(&self) -> usize {
        self.needs_mesh.len()
    }

    /// Run the lighting passes for a chunk, seeding from the chunk above's
    /// stored bottom row (full sun when nothing is loaded above). Returns
    /// nothing; light lives in the voxels the mesher reads.
    pub fn relight_chunk(&mut self, pos: ChunkPos) {
        let above = self
            .light_seeds
            .get(&pos.offset([0, 1, 0]))
            .map(|row| row.clone());

        let entry = match self.chunks.get_mut(&pos) {
            Some(entry) => entry,
            None => return,
        };

        let lut = self.registry.type_lut();
        let bottom = compute_sunlight_columns(&mut entry.chunk, above.as_deref(), lut);
        propagate_light(&mut entry.chunk, lut, &mut self.light_scratch);
        self.light_seeds.insert(pos, bottom);
    }

    /// Lazily computed 15-bit face-pair reachability for a chunk.
    pub fn visibility(&mut self, pos: ChunkPos) -> Option<VisibilityGraph> {
        let entry = self.chunks.get_mut(&pos)?;
        if entry.visibility.is_none() {
            entry.visibility = Some(compute_visibility(&entry.chunk, &mut self.visibility_scratch));
        }
        entry.visibility
    }

    /// The mesher's view of a chunk: its `+` neighbors, for margin reads.
    pub fn high_neighbors(&self, pos: ChunkPos) -> HighNeighbors<'_> {
        HighNeighbors {
            pos_x: self.chunk(pos.offset([1, 0, 0])),
            pos_y: self.chunk(pos.offset([0, 1, 0])),
            pos_z: self.chunk(pos.offset([0, 0, 1])),
        }
    }

    /// Which loaded chunks can contribute draw calls: a BFS over the chunk
    /// graph from the camera's chunk. An edge is taken when the current
    /// chunk's visibility graph connects the entry face to the exit face
    /// and the step direction does not point against the camera's forward.
    pub fn visible_set(&mut self, camera_chunk: ChunkPos, forward: Vector3<f32>) -> Vec<ChunkPos> {
        let mut visible = Vec::new();
        if !self.contains(camera_chunk) {
            return visible;
        }

        let mut seen = HashSet::new();
        let mut queue: VecDeque<(ChunkPos, Option<Face>)> = VecDeque::new();
        seen.insert(camera_chunk);
        queue.push_back((camera_chunk, None));

        while let Some((pos, entered_through)) = queue.pop_front() {
            visible.push(pos);

            for exit in ALL_FACES {
                // chunk-graph backface culling: never step against the view
                if forward.dot(&exit.normal()) < 0.0 {
                    continue;
                }

                // inside the chunk we entered through `entered_through`, we
                // can only leave through a face it connects to
                if let Some(entry_face) = entered_through {
                    match self.visibility(pos) {
                        Some(graph) if graph.can_see_through(entry_face, exit) => {}
                        _ => continue,
                    }
                }

                let neighbor = pos.offset(exit.offset());
                if !self.contains(neighbor) || !seen.insert(neighbor) {
                    continue;
                }
                queue.push_back((neighbor, Some(exit.opposite())));
            }
        }

        visible
    }
}
