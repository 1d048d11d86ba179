//! Spawn placement: a straight-down raycast against the union of currently
//! meshed chunks. Used on first join and every respawn.

use nalgebra::Point3;

use terravox_common::{prelude::*, VOXEL_SCALE};

use crate::{
    raycast::{trace_meshed_solid, Ray},
    world::ClientWorld,
};

/// World-space height the spawn ray starts from, meters.
pub const SPAWN_RAYCAST_HEIGHT: f32 = 100.0;

/// Lowest chunk layer the ray bothers scanning.
const SPAWN_RAYCAST_FLOOR_CY: i32 = -4;

pub const PLAYER_HEIGHT: f32 = 1.8;
pub const SPAWN_HEIGHT_OFFSET: f32 = 0.25;

/// Drop a ray straight down through the meshed chunks under `(x, z)`.
/// Returns the world-space y of the first solid surface, or `None` when no
/// meshed chunk provides one (terrain not ready).
pub fn raycast_down(world: &ClientWorld, x: f32, z: f32) -> Option<f32> {
    let hit = trace_meshed_solid(
        world,
        Ray {
            origin: point![x, SPAWN_RAYCAST_HEIGHT, z],
            direction: vector![0.0, -1.0, 0.0],
        },
        SPAWN_RAYCAST_FLOOR_CY,
    )?;
    Some((hit.pos.y + 1) as f32 * VOXEL_SCALE)
}

/// Spawn position above the terrain surface at `(x, z)`, if the terrain is
/// ready there.
pub fn find_spawn_position(world: &ClientWorld, x: f32, z: f32) -> Option<Point3<f32>> {
    let surface_y = raycast_down(world, x, z)?;
    Some(point![
        x,
        surface_y + PLAYER_HEIGHT + SPAWN_HEIGHT_OFFSET,
        z
    ])
}

/// Respawn priority: the last grounded position, then the surface under the
/// player's current XZ, then the surface at the world origin, then nothing
/// (terrain not ready anywhere useful).
pub fn find_respawn_position(
    world: &ClientWorld,
    current: Point3<f32>,
    last_grounded: Option<Point3<f32>>,
) -> Option<Point3<f32>> {
    if let Some(grounded) = last_grounded {
        return Some(grounded);
    }
    find_spawn_position(world, current.x, current.z)
        .or_else(|| find_spawn_position(world, 0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use terravox_common::{
        material::MaterialRegistry,
        world::{chunk::Chunk, ChunkPos},
        CHUNK_VOLUME,
    };

    /// Flat meshed terrain with the surface at `height_voxels`, covering
    /// chunk columns near the origin only.
    fn terrain_world(height_voxels: i32) -> ClientWorld {
        let mut world = ClientWorld::new(MaterialRegistry::with_default_materials());
        for cx in -1..=1 {
            for cz in -1..=1 {
                for cy in 0..=2 {
                    let pos = ChunkPos::new([cx, cy, cz]);
                    let chunk = Chunk::flat(pos, height_voxels, 3);
                    world.apply_chunk_data(pos, 0, &chunk.to_dense());
                    world.mark_meshed(pos);
                }
            }
        }
        world
    }

    #[test]
    fn raycast_hits_the_flat_surface() {
        // plane top at 60 voxels = 15 m
        let world = terrain_world(60);
        assert_eq!(raycast_down(&world, 0.0, 0.0), Some(15.0));
        assert_eq!(raycast_down(&world, 3.0, -3.0), Some(15.0));
    }

    #[test]
    fn raycast_misses_unmeshed_terrain() {
        let mut world = terrain_world(60);
        // data present but nothing meshed yet outside the origin column
        let far = ChunkPos::new([10, 0, 10]);
        let chunk = Chunk::flat(far, 60, 3);
        world.apply_chunk_data(far, 0, &chunk.to_dense());

        assert_eq!(raycast_down(&world, 81.0, 81.0), None);
    }

    #[test]
    fn respawn_prefers_grounded_then_current_then_origin() {
        let world = terrain_world(60);
        let expected_y = 15.0 + PLAYER_HEIGHT + SPAWN_HEIGHT_OFFSET;

        // last grounded wins outright
        let grounded = point![2.0, 16.0, 2.0];
        assert_eq!(
            find_respawn_position(&world, point![0.0, 0.0, 0.0], Some(grounded)),
            Some(grounded)
        );

        // far off the map, no grounded position: falls back to the origin
        assert_eq!(
            find_respawn_position(&world, point![500.0, -100.0, 500.0], None),
            Some(point![0.0, expected_y, 0.0])
        );

        // near the map, current position works directly
        let near = find_respawn_position(&world, point![3.0, 50.0, 3.0], None).unwrap();
        assert_eq!(near.x, 3.0);
        assert_eq!(near.y, expected_y);
    }

    #[test]
    fn empty_world_yields_no_respawn() {
        let world = ClientWorld::new(MaterialRegistry::with_default_materials());
        assert_eq!(
            find_respawn_position(&world, point![0.0, 0.0, 0.0], None),
            None
        );

        // loaded but all air: still nothing to stand on
        let mut world = ClientWorld::new(MaterialRegistry::with_default_materials());
        for cy in 0..2 {
            let pos = ChunkPos::new([0, cy, 0]);
            world.apply_chunk_data(pos, 0, &vec![0u16; CHUNK_VOLUME]);
            world.mark_meshed(pos);
        }
        assert_eq!(find_respawn_position(&world, point![0.0, 0.0, 0.0], None), None);
    }
}
