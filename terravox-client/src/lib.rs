//! The presentation-side core, minus the renderer: the client chunk cache,
//! the mesh worker pool, chunk streaming, spawn raycasts and build-preview
//! snapping. A rendering backend consumes [`mesher::MeshEvent`]s and the
//! [`world::ClientWorld`] render set; it never touches voxels directly.

pub mod map;
pub mod mesher;
pub mod raycast;
pub mod session;
pub mod snap;
pub mod spawn;
pub mod streaming;
pub mod world;

use mesher::{MeshRequest, MeshWorkerPool};
use terravox_common::mesh::{fill_sample_grid, SkipHighBoundary};
use world::ClientWorld;

/// Feed up to `budget` queued re-mesh requests into the worker pool:
/// relight, expand into a recycled sample grid, dispatch. Chunks already in
/// flight (or previewing) are skipped, not lost; they re-queue via the
/// world's dirty tracking when their result lands.
pub fn pump_meshing(world: &mut ClientWorld, pool: &MeshWorkerPool, budget: usize) {
    for _ in 0..budget {
        let pos = match world.pop_mesh_request() {
            Some(pos) => pos,
            None => break,
        };
        if pool.in_flight(pos) || pool.is_preview_chunk(pos) {
            world.request_mesh(pos);
            continue;
        }

        world.relight_chunk(pos);

        let chunk = match world.chunk(pos) {
            Some(chunk) => chunk,
            None => continue,
        };
        let neighbors = world.high_neighbors(pos);
        let mut grid = pool.take_grid();
        fill_sample_grid(chunk, &neighbors, &mut grid);
        let skip = SkipHighBoundary::from_missing(neighbors.missing_mask());

        pool.dispatch(MeshRequest { key: pos, grid, skip }, false);
    }
}
