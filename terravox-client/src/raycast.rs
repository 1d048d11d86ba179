//! Voxel raycasting over the client world: the amanatides-woo traversal
//! that aiming, build-target picking and the spawn probe all share.

use nalgebra::{Point3, Vector3};

use terravox_common::{
    world::{ChunkPos, VoxelPos},
    Axis, Face, VOXEL_SCALE,
};

use crate::world::ClientWorld;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaycastHit {
    pub pos: VoxelPos,
    /// the face of the hit voxel the ray entered through; `None` when the
    /// ray started inside it
    pub face: Option<Face>,
}

#[derive(Copy, Clone, Debug)]
pub enum RaycastStep {
    Continue,
    Exit,
    Hit,
}

fn f32_checked_div(num: f32, denom: f32) -> Option<f32> {
    if denom == 0.0 {
        None
    } else {
        Some(num / denom)
    }
}

/// March voxel by voxel along `ray` (world meters), asking `func` about
/// every cell, until it reports a hit or gives up.
pub fn trace_ray_generic<F>(ray: Ray, mut func: F) -> Option<RaycastHit>
where
    F: FnMut(VoxelPos) -> RaycastStep,
{
    // positions in voxel units so the grid is unit-spaced
    let origin_v = ray.origin / VOXEL_SCALE;
    let mut current = VoxelPos::new([
        origin_v.x.floor() as i32,
        origin_v.y.floor() as i32,
        origin_v.z.floor() as i32,
    ]);

    let step_x = ray.direction.x.signum();
    let step_y = ray.direction.y.signum();
    let step_z = ray.direction.z.signum();

    let next_x = current.x as f32 + if step_x < 0.0 { 0.0 } else { 1.0 };
    let next_y = current.y as f32 + if step_y < 0.0 { 0.0 } else { 1.0 };
    let next_z = current.z as f32 + if step_z < 0.0 { 0.0 } else { 1.0 };

    // distance along the ray at which each axis crosses into the next
    // voxel; an axis the ray is parallel to never crosses, so it compares
    // larger than everything
    let mut t_max_x = f32_checked_div(next_x - origin_v.x, ray.direction.x).unwrap_or(f32::MAX);
    let mut t_max_y = f32_checked_div(next_y - origin_v.y, ray.direction.y).unwrap_or(f32::MAX);
    let mut t_max_z = f32_checked_div(next_z - origin_v.z, ray.direction.z).unwrap_or(f32::MAX);

    let t_delta_x = f32_checked_div(step_x, ray.direction.x).unwrap_or(f32::MAX);
    let t_delta_y = f32_checked_div(step_y, ray.direction.y).unwrap_or(f32::MAX);
    let t_delta_z = f32_checked_div(step_z, ray.direction.z).unwrap_or(f32::MAX);

    let step_x = step_x as i32;
    let step_y = step_y as i32;
    let step_z = step_z as i32;
    let mut entered_axis = None;

    loop {
        match func(current) {
            RaycastStep::Continue => {}
            RaycastStep::Exit => break None,
            RaycastStep::Hit => {
                let face = entered_axis.map(|axis| match axis {
                    Axis::X if step_x > 0 => Face::NegX,
                    Axis::X => Face::PosX,
                    Axis::Y if step_y > 0 => Face::NegY,
                    Axis::Y => Face::PosY,
                    Axis::Z if step_z > 0 => Face::NegZ,
                    Axis::Z => Face::PosZ,
                });
                break Some(RaycastHit { pos: current, face });
            }
        }

        // take the smallest step that leaves the current voxel
        if t_max_x < t_max_y && t_max_x < t_max_z {
            current.x += step_x;
            t_max_x += t_delta_x;
            entered_axis = Some(Axis::X);
        } else if t_max_y < t_max_z {
            current.y += step_y;
            t_max_y += t_delta_y;
            entered_axis = Some(Axis::Y);
        } else {
            current.z += step_z;
            t_max_z += t_delta_z;
            entered_axis = Some(Axis::Z);
        }
    }
}

/// First solid voxel within `radius` meters along the ray, through loaded
/// chunks only; the aim probe for placing builds.
#[must_use]
pub fn trace_solid(world: &ClientWorld, ray: Ray, radius: f32) -> Option<RaycastHit> {
    let start = ray.origin / VOXEL_SCALE;
    let radius_sq = (radius / VOXEL_SCALE).powi(2);

    trace_ray_generic(ray, |pos| {
        let dx = pos.x as f32 + 0.5 - start.x;
        let dy = pos.y as f32 + 0.5 - start.y;
        let dz = pos.z as f32 + 0.5 - start.z;
        if dx * dx + dy * dy + dz * dz > radius_sq {
            return RaycastStep::Exit;
        }

        let (chunk_pos, [lx, ly, lz]) = pos.chunk_and_offset();
        match world.chunk(chunk_pos) {
            // unloaded space neither blocks nor terminates an aim ray
            None => RaycastStep::Continue,
            Some(chunk) if chunk.get(lx, ly, lz).is_solid() => RaycastStep::Hit,
            Some(_) => RaycastStep::Continue,
        }
    })
}

/// Like [`trace_solid`], but restricted to chunks that are both loaded and
/// meshed, and stopping at `floor_cy`; the spawn probe.
#[must_use]
pub fn trace_meshed_solid(
    world: &ClientWorld,
    ray: Ray,
    floor_cy: i32,
) -> Option<RaycastHit> {
    trace_ray_generic(ray, |pos| {
        let (chunk_pos, [lx, ly, lz]) = pos.chunk_and_offset();
        if chunk_pos.y < floor_cy {
            return RaycastStep::Exit;
        }
        if !world.is_meshed(chunk_pos) {
            return RaycastStep::Continue;
        }
        match world.chunk(chunk_pos) {
            Some(chunk) if chunk.get(lx, ly, lz).is_solid() => RaycastStep::Hit,
            _ => RaycastStep::Continue,
        }
    })
}

/// Suggested center for a build op: the aim hit pushed out along the hit
/// face by half the build's height, so the new shape sits on the surface.
pub fn build_anchor(hit: &RaycastHit, half_height: f32) -> Point3<f32> {
    let center = hit.pos.center_world();
    match hit.face {
        Some(face) => center + face.normal() * (VOXEL_SCALE * 0.5 + half_height),
        None => center,
    }
}

/// Convenience for callers that think in chunk terms.
pub fn chunk_of_hit(hit: &RaycastHit) -> ChunkPos {
    ChunkPos::from(hit.pos)
}
