//! Get-or-generate chunk access: cache first, then disk, then the terrain
//! generator plus stamp placer. The async path runs disk reads and
//! generation on the worker pool and hands finished chunks back through a
//! completion channel; the blocking path exists for the build handler and
//! surface-column assembly, which need the chunk *now*.

use std::{collections::HashSet, sync::Arc};

use terravox_common::{
    gen::{
        stamp::{StampLibrary, StampPlacer},
        TerrainGenerator,
    },
    material::MaterialRegistry,
    util::Completions,
    world::{chunk::Chunk, ChunkPos},
};

use crate::store::ChunkStore;

struct FinishedChunk {
    chunk: Chunk,
    cache: bool,
}

pub struct ChunkProvider {
    store: ChunkStore,
    terrain: Arc<TerrainGenerator>,
    stamps: Arc<StampPlacer>,
    pending_gen: HashSet<ChunkPos>,
    finished: Completions<FinishedChunk>,
}

fn generate(terrain: &TerrainGenerator, stamps: &StampPlacer, pos: ChunkPos) -> Chunk {
    let mut chunk = Chunk::new(pos, terrain.generate_chunk(pos));
    stamps.apply_to_chunk(terrain, &mut chunk);
    chunk
}

impl ChunkProvider {
    pub fn new(store: ChunkStore, registry: &Arc<MaterialRegistry>) -> Self {
        let seed = store.meta().noise_seed();
        let terrain = Arc::new(TerrainGenerator::new(seed, registry));
        let stamps = Arc::new(StampPlacer::new(seed, StampLibrary::standard(registry)));
        Self {
            store,
            terrain,
            stamps,
            pending_gen: HashSet::new(),
            finished: Completions::new(),
        }
    }

    pub fn terrain(&self) -> &Arc<TerrainGenerator> {
        &self.terrain
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ChunkStore {
        &mut self.store
    }

    pub fn get_cached(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.store.get(pos)
    }

    /// Whether an async load/generate for this chunk is still in flight.
    pub fn is_pending(&self, pos: ChunkPos) -> bool {
        self.pending_gen.contains(&pos) || self.store.is_load_pending(pos)
    }

    /// Async get-or-create: returns immediately; the chunk lands in the
    /// cache once [`poll_finished`] sees its completion. `force_regen`
    /// bypasses both cache and disk and does not cache its result.
    pub fn request(&mut self, pos: ChunkPos, force_regen: bool) {
        if !force_regen && (self.store.contains(pos) || self.is_pending(pos)) {
            return;
        }
        if !self.pending_gen.insert(pos) {
            return;
        }

        let terrain = Arc::clone(&self.terrain);
        let stamps = Arc::clone(&self.stamps);
        let root = self.store.root().to_owned();
        let tx = self.finished.sender();

        rayon::spawn(move || {
            let from_disk = if force_regen {
                Ok(None)
            } else {
                crate::store::read_chunk_record(&root, pos)
            };
            let chunk = match from_disk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => generate(&terrain, &stamps, pos),
                Err(err) => {
                    log::error!("disk load of {} failed, regenerating: {}", pos, err);
                    generate(&terrain, &stamps, pos)
                }
            };
            let _ = tx.send(FinishedChunk {
                chunk,
                cache: !force_regen,
            });
        });
    }

    /// Drain completions into the cache; returns the chunk positions that
    /// just became available.
    pub fn poll_finished(&mut self) -> Vec<ChunkPos> {
        let finished: Vec<_> = self.finished.drain().collect();
        let mut ready = Vec::with_capacity(finished.len());
        for done in finished {
            let pos = done.chunk.pos();
            self.pending_gen.remove(&pos);
            if done.cache && !self.store.contains(pos) {
                self.store.insert(done.chunk);
            }
            ready.push(pos);
        }
        ready
    }

    /// Synchronous get-or-create. Freshly generated chunks are cached dirty
    /// so the periodic flush persists them; disk copies stay clean until a
    /// build touches them.
    pub fn get_or_generate_blocking(&mut self, pos: ChunkPos) -> &mut Chunk {
        if !self.store.contains(pos) {
            match self.store.load_blocking(pos) {
                Ok(Some(chunk)) => self.store.insert_clean(chunk),
                Ok(None) => self.store.insert(generate(&self.terrain, &self.stamps, pos)),
                Err(err) => {
                    log::error!("disk load of {} failed, regenerating: {}", pos, err);
                    self.store.insert(generate(&self.terrain, &self.stamps, pos));
                }
            }
        }
        self.store.get_mut(pos).expect("chunk just ensured")
    }
}
