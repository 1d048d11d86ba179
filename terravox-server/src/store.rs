//! Persistent chunk and tile stores: a write-through cache over a
//! directory-backed key-value layout.
//!
//! On-disk layout under a room's data directory:
//!
//! - `meta.json` — world metadata `{ seed, created_at }`
//! - `chunks/{cx},{cy},{cz}.bin` — 12 bytes of coords, then the voxel grid
//!   as 65536 bytes, u16 LSB-first
//! - `tiles/{tx},{tz}.bin` — 8 bytes of coords, 2048 bytes of i16 heights,
//!   1024 bytes of materials
//!
//! The cache is single-owner: only the room's event loop touches it. Disk
//! reads for missing chunks run on the worker pool and come back through a
//! completion channel drained by [`ChunkStore::drain_loads`].

use rand::{rngs::SmallRng, FromEntropy, Rng};
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use terravox_common::{
    prelude::*,
    util::Completions,
    world::{
        chunk::Chunk,
        tile::MapTile,
        ChunkPos, TilePos,
    },
    CHUNK_AREA, CHUNK_VOLUME,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub seed: i64,
    pub created_at: u64,
}

impl WorldMeta {
    fn fresh() -> Self {
        let mut rng = SmallRng::from_entropy();
        Self {
            seed: rng.gen(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0),
        }
    }

    /// The seed as the noise stack consumes it.
    pub fn noise_seed(&self) -> u32 {
        self.seed as u32
    }
}

fn chunk_path(root: &Path, pos: ChunkPos) -> PathBuf {
    root.join("chunks").join(format!("{}.bin", pos))
}

/// Free-standing chunk read for worker-pool tasks that cannot borrow the
/// store.
pub(crate) fn read_chunk_record(root: &Path, pos: ChunkPos) -> Result<Option<Chunk>> {
    match fs::read(chunk_path(root, pos)) {
        Ok(bytes) => Ok(Some(decode_chunk_record(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn tile_path(root: &Path, pos: TilePos) -> PathBuf {
    root.join("tiles").join(format!("{}.bin", pos))
}

fn encode_chunk_record(chunk: &Chunk) -> Vec<u8> {
    let pos = chunk.pos();
    let mut record = Vec::with_capacity(12 + CHUNK_VOLUME * 2);
    record.extend_from_slice(&pos.x.to_le_bytes());
    record.extend_from_slice(&pos.y.to_le_bytes());
    record.extend_from_slice(&pos.z.to_le_bytes());
    for bits in chunk.to_dense().iter() {
        record.extend_from_slice(&bits.to_le_bytes());
    }
    record
}

fn decode_chunk_record(bytes: &[u8]) -> Result<Chunk> {
    if bytes.len() != 12 + CHUNK_VOLUME * 2 {
        bail!("chunk record has {} bytes", bytes.len());
    }
    let x = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let y = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let z = i32::from_le_bytes(bytes[8..12].try_into().unwrap());

    let dense: Vec<u16> = bytes[12..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(Chunk::from_dense(ChunkPos::new([x, y, z]), &dense)?)
}

fn encode_tile_record(tile: &MapTile) -> Vec<u8> {
    let mut record = Vec::with_capacity(8 + CHUNK_AREA * 3);
    record.extend_from_slice(&tile.pos().x.to_le_bytes());
    record.extend_from_slice(&tile.pos().z.to_le_bytes());
    for &height in tile.heights().iter() {
        record.extend_from_slice(&height.to_le_bytes());
    }
    record.extend_from_slice(tile.materials());
    record
}

fn decode_tile_record(bytes: &[u8]) -> Result<MapTile> {
    if bytes.len() != 8 + CHUNK_AREA * 3 {
        bail!("tile record has {} bytes", bytes.len());
    }
    let x = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let z = i32::from_le_bytes(bytes[4..8].try_into().unwrap());

    let mut tile = MapTile::new(TilePos::new(x, z));
    for index in 0..CHUNK_AREA {
        let offset = 8 + index * 2;
        let height = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        let material = bytes[8 + CHUNK_AREA * 2 + index];
        tile.set_column(index % 32, index / 32, height, material);
    }
    tile.rehash();
    Ok(tile)
}

enum LoadResult {
    Found(Chunk),
    Absent(ChunkPos),
}

pub struct ChunkStore {
    root: PathBuf,
    meta: WorldMeta,
    cache: HashMap<ChunkPos, Chunk>,
    dirty: HashSet<ChunkPos>,
    pending_loads: HashSet<ChunkPos>,
    loads: Completions<LoadResult>,
}

impl ChunkStore {
    /// Open (or initialize) the store rooted at `root`. Metadata is written
    /// on first open with a random seed and reloaded verbatim afterwards.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(root.join("chunks"))?;
        fs::create_dir_all(root.join("tiles"))?;

        let meta_path = root.join("meta.json");
        let meta = match fs::read(&meta_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let meta = WorldMeta::fresh();
                fs::write(&meta_path, serde_json::to_vec(&meta)?)?;
                meta
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            root,
            meta,
            cache: HashMap::new(),
            dirty: HashSet::new(),
            pending_loads: HashSet::new(),
            loads: Completions::new(),
        })
    }

    pub fn meta(&self) -> WorldMeta {
        self.meta
    }

    pub fn get(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.cache.get(&pos)
    }

    pub fn get_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        self.cache.get_mut(&pos)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.cache.contains_key(&pos)
    }

    /// Cache a chunk and schedule it for the next flush.
    pub fn insert(&mut self, chunk: Chunk) {
        let pos = chunk.pos();
        self.cache.insert(pos, chunk);
        self.dirty.insert(pos);
    }

    /// Cache a chunk without dirtying it (used for disk loads).
    pub(crate) fn insert_clean(&mut self, chunk: Chunk) {
        self.cache.insert(chunk.pos(), chunk);
    }

    pub fn mark_dirty(&mut self, pos: ChunkPos) {
        if self.cache.contains_key(&pos) {
            self.dirty.insert(pos);
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_load_pending(&self, pos: ChunkPos) -> bool {
        self.pending_loads.contains(&pos)
    }

    /// Kick off a disk read on the worker pool; completion arrives via
    /// [`drain_loads`]. No-op when cached or already in flight.
    pub fn request_load(&mut self, pos: ChunkPos) {
        if self.cache.contains_key(&pos) || !self.pending_loads.insert(pos) {
            return;
        }

        let path = chunk_path(&self.root, pos);
        let tx = self.loads.sender();
        rayon::spawn(move || {
            let result = match fs::read(&path) {
                Ok(bytes) => match decode_chunk_record(&bytes) {
                    Ok(chunk) => LoadResult::Found(chunk),
                    Err(err) => {
                        log::error!("corrupt chunk record {}: {}", path.display(), err);
                        LoadResult::Absent(pos)
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => LoadResult::Absent(pos),
                Err(err) => {
                    log::error!("failed reading chunk {}: {}", path.display(), err);
                    LoadResult::Absent(pos)
                }
            };
            let _ = tx.send(result);
        });
    }

    /// Absorb finished disk reads. Returns `(pos, found)` per completion;
    /// found chunks are now cached (clean).
    pub fn drain_loads(&mut self) -> Vec<(ChunkPos, bool)> {
        let results: Vec<_> = self.loads.drain().collect();
        let mut completed = Vec::with_capacity(results.len());
        for result in results {
            match result {
                LoadResult::Found(chunk) => {
                    let pos = chunk.pos();
                    self.pending_loads.remove(&pos);
                    self.insert_clean(chunk);
                    completed.push((pos, true));
                }
                LoadResult::Absent(pos) => {
                    self.pending_loads.remove(&pos);
                    completed.push((pos, false));
                }
            }
        }
        completed
    }

    /// Synchronous disk read, bypassing the worker pool.
    pub fn load_blocking(&self, pos: ChunkPos) -> Result<Option<Chunk>> {
        read_chunk_record(&self.root, pos)
    }

    /// Write every dirty entry in one batch. Entries that fail stay dirty
    /// and retry on the next flush.
    pub fn flush(&mut self) -> usize {
        let mut written = 0;
        let dirty: Vec<_> = self.dirty.iter().copied().collect();
        for pos in dirty {
            let chunk = match self.cache.get(&pos) {
                Some(chunk) => chunk,
                None => {
                    self.dirty.remove(&pos);
                    continue;
                }
            };
            match fs::write(chunk_path(&self.root, pos), encode_chunk_record(chunk)) {
                Ok(()) => {
                    self.dirty.remove(&pos);
                    written += 1;
                }
                Err(err) => {
                    log::error!("flush of chunk {} failed, will retry: {}", pos, err);
                }
            }
        }
        written
    }

    /// Drop everything on disk and in memory and roll a fresh seed.
    pub fn clear(&mut self) -> Result<()> {
        let root = self.root.clone();
        fs::remove_dir_all(&root)?;
        *self = Self::open(root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub struct TileStore {
    root: PathBuf,
    cache: HashMap<TilePos, MapTile>,
    dirty: HashSet<TilePos>,
}

impl TileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            cache: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn get(&self, pos: TilePos) -> Option<&MapTile> {
        self.cache.get(&pos)
    }

    /// Cache lookup, falling back to a blocking disk read (tiles are 3 KiB).
    pub fn get_or_load(&mut self, pos: TilePos) -> Option<&MapTile> {
        if !self.cache.contains_key(&pos) {
            match fs::read(tile_path(&self.root, pos)) {
                Ok(bytes) => match decode_tile_record(&bytes) {
                    Ok(tile) => {
                        self.cache.insert(pos, tile);
                    }
                    Err(err) => {
                        log::error!("corrupt tile record for {}: {}", pos, err);
                        return None;
                    }
                },
                Err(_) => return None,
            }
        }
        self.cache.get(&pos)
    }

    pub fn insert(&mut self, tile: MapTile) {
        let pos = tile.pos();
        self.cache.insert(pos, tile);
        self.dirty.insert(pos);
    }

    pub fn remove(&mut self, pos: TilePos) {
        self.cache.remove(&pos);
        self.dirty.remove(&pos);
        let _ = fs::remove_file(tile_path(&self.root, pos));
    }

    pub fn flush(&mut self) -> usize {
        let mut written = 0;
        let dirty: Vec<_> = self.dirty.iter().copied().collect();
        for pos in dirty {
            let tile = match self.cache.get(&pos) {
                Some(tile) => tile,
                None => {
                    self.dirty.remove(&pos);
                    continue;
                }
            };
            match fs::write(tile_path(&self.root, pos), encode_tile_record(tile)) {
                Ok(()) => {
                    self.dirty.remove(&pos);
                    written += 1;
                }
                Err(err) => {
                    log::error!("flush of tile {} failed, will retry: {}", pos, err);
                }
            }
        }
        written
    }
}

#[cfg(test)]
pub(crate) fn test_data_dir(label: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let dir = std::env::temp_dir().join(format!(
        "terravox-test-{}-{}-{}",
        label,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use terravox_common::voxel::Voxel;

    #[test]
    fn meta_survives_reopen_and_clear_rolls_a_new_seed() {
        let dir = test_data_dir("meta");

        let store = ChunkStore::open(&dir).unwrap();
        let first = store.meta();
        drop(store);

        let mut store = ChunkStore::open(&dir).unwrap();
        assert_eq!(store.meta(), first);

        store.clear().unwrap();
        // overwhelmingly likely; equal seeds would mean the rng is broken
        assert_ne!(store.meta().seed, first.seed);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn chunk_record_round_trips_through_disk() {
        let dir = test_data_dir("chunk-roundtrip");
        let mut store = ChunkStore::open(&dir).unwrap();

        let pos = ChunkPos::new([3, -1, 7]);
        let mut chunk = Chunk::empty(pos);
        chunk.set(1, 2, 3, Voxel::pack(0.5, 9, 4));
        let expected = chunk.to_dense();

        store.insert(chunk);
        assert_eq!(store.dirty_count(), 1);
        assert_eq!(store.flush(), 1);
        assert_eq!(store.dirty_count(), 0);

        let loaded = store.load_blocking(pos).unwrap().expect("chunk on disk");
        assert_eq!(loaded.pos(), pos);
        assert_eq!(loaded.to_dense(), expected);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn async_loads_complete_through_the_channel() {
        let dir = test_data_dir("chunk-async");
        let mut store = ChunkStore::open(&dir).unwrap();

        let pos = ChunkPos::new([0, 0, 0]);
        let mut chunk = Chunk::empty(pos);
        chunk.set(0, 0, 0, Voxel::pack(0.5, 1, 0));
        store.insert(chunk);
        store.flush();

        // evict the cache by reopening
        let mut store = ChunkStore::open(&dir).unwrap();
        let missing = ChunkPos::new([9, 9, 9]);
        store.request_load(pos);
        store.request_load(missing);

        let mut completed = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while completed.len() < 2 && std::time::Instant::now() < deadline {
            completed.extend(store.drain_loads());
            std::thread::yield_now();
        }

        assert!(completed.contains(&(pos, true)));
        assert!(completed.contains(&(missing, false)));
        assert!(store.get(pos).is_some());
        assert!(store.get(missing).is_none());
        assert!(!store.is_load_pending(pos));
        // loads arrive clean; nothing new to flush
        assert_eq!(store.dirty_count(), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn tile_records_round_trip() {
        let dir = test_data_dir("tiles");
        fs::create_dir_all(dir.join("tiles")).unwrap();
        let mut store = TileStore::new(&dir);

        let mut tile = MapTile::new(TilePos::new(-2, 5));
        tile.set_column(4, 9, 33, 2);
        tile.set_column(31, 31, -5, 7);
        tile.rehash();
        let hash = tile.content_hash();

        store.insert(tile);
        assert_eq!(store.flush(), 1);

        let mut fresh = TileStore::new(&dir);
        let loaded = fresh.get_or_load(TilePos::new(-2, 5)).unwrap();
        assert_eq!(loaded.height(4, 9), 33);
        assert_eq!(loaded.material(31, 31), 7);
        assert_eq!(loaded.content_hash(), hash);

        assert!(fresh.get_or_load(TilePos::new(8, 8)).is_none());

        fs::remove_dir_all(&dir).unwrap();
    }
}
