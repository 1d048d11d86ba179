//! Map tiles and surface columns.
//!
//! The tile fast path samples the terrain generator directly, which is
//! cheap but blind to stamps and builds. The surface column path loads the
//! actual chunk stack and then rescans it per XZ column, refreshing the
//! tile with whatever the stack really contains.

use terravox_common::{
    world::{tile::{MapTile, NO_SURFACE}, ChunkPos, TilePos},
    CHUNK_LENGTH,
};

use crate::{provider::ChunkProvider, store::TileStore};

/// Chunks to include below the lowest surface-intersecting chunk.
pub const SURFACE_COLUMN_BUFFER: i32 = 1;

/// Hard cap on a column walk, in chunks; a runaway scan is a bug, not a
/// tall mountain.
const MAX_COLUMN_CHUNKS: usize = 32;

pub struct SurfaceColumn {
    pub tile: MapTile,
    /// surface-intersecting stack, bottom to top
    pub chunks: Vec<ChunkPos>,
}

pub struct TileProvider {
    store: TileStore,
}

impl TileProvider {
    pub fn new(store: TileStore) -> Self {
        Self { store }
    }

    /// Fast path: a tile straight from the terrain layers, no chunk data.
    pub fn generate_tile(provider: &ChunkProvider, pos: TilePos) -> MapTile {
        let terrain = provider.terrain();
        let mut tile = MapTile::new(pos);
        let base_x = pos.x * CHUNK_LENGTH as i32;
        let base_z = pos.z * CHUNK_LENGTH as i32;

        for lz in 0..CHUNK_LENGTH {
            for lx in 0..CHUNK_LENGTH {
                let sample = terrain.sample_surface(
                    (base_x + lx as i32) as f32,
                    (base_z + lz as i32) as f32,
                );
                tile.set_column(lx, lz, sample.height, sample.material);
            }
        }
        tile.rehash();
        tile
    }

    pub fn get_or_create(&mut self, provider: &ChunkProvider, pos: TilePos) -> &MapTile {
        if self.store.get_or_load(pos).is_none() {
            let tile = Self::generate_tile(provider, pos);
            self.store.insert(tile);
        }
        self.store.get(pos).expect("tile just ensured")
    }

    /// A build touched this column; the cached summary no longer reflects
    /// the chunk stack and must be rebuilt on next request.
    pub fn invalidate(&mut self, pos: TilePos) {
        self.store.remove(pos);
    }

    pub fn flush(&mut self) -> usize {
        self.store.flush()
    }

    /// The accurate path: tile plus the loaded chunk stack that covers the
    /// surface, with the tile refreshed from what the chunks actually hold.
    pub fn surface_column(
        &mut self,
        provider: &mut ChunkProvider,
        pos: TilePos,
    ) -> SurfaceColumn {
        let (terrain_min, terrain_max) = {
            let tile = self.get_or_create(provider, pos);
            match tile.height_range() {
                Some(range) => range,
                // a tile with no surface anywhere still gets a minimal stack
                // around the terrain baseline
                None => (0, 0),
            }
        };

        let min_cy = (terrain_min as i32).div_euclid(CHUNK_LENGTH as i32) - SURFACE_COLUMN_BUFFER;
        let max_cy = (terrain_max as i32).div_euclid(CHUNK_LENGTH as i32);

        let mut chunks = Vec::new();
        let mut cy = min_cy;
        loop {
            let chunk_pos = pos.chunk(cy);
            let chunk = provider.get_or_generate_blocking(chunk_pos);
            let has_solid = chunk.has_any_solid();

            // walk upward until we clear the terrain range and hit sky;
            // stamps and builds can push the stack above the baseline
            if has_solid || cy <= max_cy {
                chunks.push(chunk_pos);
            }
            if cy > max_cy && !has_solid {
                break;
            }
            if chunks.len() >= MAX_COLUMN_CHUNKS {
                log::warn!("surface column {} hit the {} chunk cap", pos, MAX_COLUMN_CHUNKS);
                break;
            }
            cy += 1;
        }

        let tile = self.rescan_tile(provider, pos, &chunks);
        SurfaceColumn { tile, chunks }
    }

    /// Re-derive `heights`/`materials` from the loaded stack, top-down.
    /// Captures everything the fast path cannot see.
    fn rescan_tile(
        &mut self,
        provider: &ChunkProvider,
        pos: TilePos,
        chunks: &[ChunkPos],
    ) -> MapTile {
        let mut tile = MapTile::new(pos);

        for lz in 0..CHUNK_LENGTH {
            'column: for lx in 0..CHUNK_LENGTH {
                for &chunk_pos in chunks.iter().rev() {
                    let chunk = match provider.get_cached(chunk_pos) {
                        Some(chunk) => chunk,
                        None => continue,
                    };
                    let base_y = chunk_pos.origin().y;
                    for ly in (0..CHUNK_LENGTH).rev() {
                        let voxel = chunk.get(lx, ly, lz);
                        if voxel.is_solid() {
                            tile.set_column(
                                lx,
                                lz,
                                (base_y + ly as i32) as i16,
                                voxel.material(),
                            );
                            continue 'column;
                        }
                    }
                }
                tile.set_column(lx, lz, NO_SURFACE, 0);
            }
        }

        tile.rehash();
        self.store.insert(tile.clone());
        tile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{test_data_dir, ChunkStore, TileStore};
    use terravox_common::material::MaterialRegistry;

    fn setup(label: &str) -> (ChunkProvider, TileProvider, std::path::PathBuf) {
        let dir = test_data_dir(label);
        let registry = MaterialRegistry::with_default_materials();
        let store = ChunkStore::open(&dir).unwrap();
        let tiles = TileProvider::new(TileStore::new(store.root()));
        (ChunkProvider::new(store, &registry), tiles, dir)
    }

    #[test]
    fn fast_tile_matches_terrain_samples() {
        let (provider, mut tiles, dir) = setup("fast-tile");
        let pos = TilePos::new(0, 0);
        let tile = tiles.get_or_create(&provider, pos);

        let sample = provider.terrain().sample_surface(5.0, 9.0);
        assert_eq!(tile.height(5, 9), sample.height);
        assert_eq!(tile.material(5, 9), sample.material);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn surface_column_covers_every_tile_column() {
        let (mut provider, mut tiles, dir) = setup("column");
        let column = tiles.surface_column(&mut provider, TilePos::new(0, 0));

        assert!(!column.chunks.is_empty());
        // the stack must contain the surface voxel of every column
        for lz in 0..CHUNK_LENGTH {
            for lx in 0..CHUNK_LENGTH {
                let height = column.tile.height(lx, lz);
                assert_ne!(height, NO_SURFACE, "column ({}, {}) lost its surface", lx, lz);

                let chunk_pos = ChunkPos::from(terravox_common::world::VoxelPos::new([
                    0,
                    height as i32,
                    0,
                ]));
                assert!(
                    column.chunks.iter().any(|c| c.y == chunk_pos.y),
                    "chunk stack misses cy {} for height {}",
                    chunk_pos.y,
                    height
                );

                let (_, [_, ly, _]) = terravox_common::world::VoxelPos::new([
                    lx as i32,
                    height as i32,
                    lz as i32,
                ])
                .chunk_and_offset();
                let chunk = provider
                    .get_cached(TilePos::new(0, 0).chunk(chunk_pos.y))
                    .expect("stack chunk cached");
                assert!(chunk.get(lx, ly, lz).is_solid());
            }
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rescan_sees_what_stamps_and_builds_added() {
        let (mut provider, mut tiles, dir) = setup("rescan");
        let pos = TilePos::new(0, 0);

        // first pass to learn the baseline
        let before = tiles.surface_column(&mut provider, pos);
        let old_height = before.tile.height(7, 7);

        // raise a pillar well above the terrain, as a build would
        let top_cy = before.chunks.last().unwrap().y;
        let chunk = provider.get_or_generate_blocking(pos.chunk(top_cy));
        let spike_ly = CHUNK_LENGTH - 1;
        chunk.set(
            7,
            spike_ly,
            7,
            terravox_common::voxel::Voxel::pack(0.5, 7, 0),
        );

        tiles.invalidate(pos);
        let after = tiles.surface_column(&mut provider, pos);
        let new_height = after.tile.height(7, 7);

        assert_eq!(
            new_height as i32,
            top_cy * CHUNK_LENGTH as i32 + spike_ly as i32
        );
        assert!(new_height > old_height);
        assert_ne!(after.tile.content_hash(), before.tile.content_hash());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
