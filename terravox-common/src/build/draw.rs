//! CSG application of a build operation to one chunk.
//!
//! The traversal visits only the voxels inside the operation's bbox
//! intersected with the chunk, transforms each voxel center into shape-local
//! space with the conjugate rotation, and applies the mode's merge rule.
//! Callers re-mesh a chunk only when this reports a change.

use nalgebra::Vector3;

use super::{
    sdf::{sdf_to_weight, shape_sdf},
    BuildMode, BuildOperation,
};
use crate::{
    voxel::Voxel,
    world::chunk::{BoundaryTouch, Chunk},
    CHUNK_LENGTH, VOXEL_SCALE,
};

/// Distance (in voxels) beyond which a sample cannot affect any weight.
const SKIP_DISTANCE: f32 = 1.5;

#[derive(Copy, Clone, Debug, Default)]
pub struct DrawOutcome {
    pub changed: bool,
    /// face-adjacent neighbors whose meshes the change spills into
    pub boundary: BoundaryTouch,
}

pub fn draw_operation(chunk: &mut Chunk, op: &BuildOperation) -> bool {
    draw_operation_outcome(chunk, op).changed
}

pub fn draw_operation_outcome(chunk: &mut Chunk, op: &BuildOperation) -> DrawOutcome {
    let mut outcome = DrawOutcome::default();
    if !op.config.is_size_valid() {
        return outcome;
    }

    let inv_rot = op.rotation.conjugate();
    let half = op.config.size * 0.5;

    let (min, max) = op.voxel_bounds();
    let origin = chunk.pos().origin();
    let lx_min = (min.x - origin.x).max(0);
    let ly_min = (min.y - origin.y).max(0);
    let lz_min = (min.z - origin.z).max(0);
    let lx_max = (max.x - origin.x).min(CHUNK_LENGTH as i32 - 1);
    let ly_max = (max.y - origin.y).min(CHUNK_LENGTH as i32 - 1);
    let lz_max = (max.z - origin.z).min(CHUNK_LENGTH as i32 - 1);
    if lx_min > lx_max || ly_min > ly_max || lz_min > lz_max {
        return outcome;
    }

    for lz in lz_min..=lz_max {
        for ly in ly_min..=ly_max {
            for lx in lx_min..=lx_max {
                let world = origin.offset([lx, ly, lz]).center_world();
                let local = inv_rot.transform_vector(&(world - op.center));
                let distance = op_sdf(op, local, half) / VOXEL_SCALE;
                if distance > SKIP_DISTANCE {
                    continue;
                }

                let (lx, ly, lz) = (lx as usize, ly as usize, lz as usize);
                let existing = chunk.get(lx, ly, lz);
                if let Some(voxel) = merge(op.config.mode, existing, distance, op.config.material) {
                    if chunk.set(lx, ly, lz, voxel) {
                        outcome.changed = true;
                        outcome.boundary.merge(Chunk::boundary_touch(lx, ly, lz));
                    }
                }
            }
        }
    }

    outcome
}

fn op_sdf(op: &BuildOperation, local: Vector3<f32>, half: Vector3<f32>) -> f32 {
    let mut d = shape_sdf(op.config.shape, local, half);

    if let Some(thickness) = op.config.thickness {
        if thickness > 0.0 {
            if op.config.closed {
                d = d.abs() - thickness * 0.5;
            } else {
                // open shells keep their y extents un-shelled so the ends
                // stay open
                let caps = local.y.abs() - half.y;
                d = (d.abs() - thickness * 0.5).max(caps);
            }
        }
    }

    if let Some(sweep) = op.config.arc_sweep {
        if sweep < std::f32::consts::TAU {
            let azimuth = local.z.atan2(local.x).abs();
            let radial = (local.x * local.x + local.z * local.z).sqrt();
            d = d.max((azimuth - sweep * 0.5) * radial.max(VOXEL_SCALE));
        }
    }

    d
}

fn merge(mode: BuildMode, existing: Voxel, distance: f32, material: u8) -> Option<Voxel> {
    let existing_weight = existing.weight();
    let delta = sdf_to_weight(distance);

    match mode {
        BuildMode::Add => {
            let weight = existing_weight
                .max(existing_weight + delta)
                .max(delta)
                .max(-0.5)
                .min(0.5);
            let material = if delta >= existing_weight {
                material
            } else {
                existing.material()
            };
            Some(
                Voxel::pack(weight, material, existing.light()),
            )
        }
        BuildMode::Subtract => {
            let delta = -delta;
            if delta < existing_weight {
                Some(existing.with_weight(delta))
            } else {
                None
            }
        }
        BuildMode::Paint => {
            if delta > 0.0 && existing_weight > 0.0 {
                Some(existing.with_material(material))
            } else {
                None
            }
        }
        BuildMode::Fill => {
            if delta > existing_weight && existing_weight <= 0.0 {
                Some(Voxel::pack(delta, material, existing.light()))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build::{BuildConfig, BuildShape},
        world::ChunkPos,
    };
    use nalgebra::{point, vector, UnitQuaternion};

    fn cube_op(mode: BuildMode, center: [f32; 3], size: f32, material: u8) -> BuildOperation {
        BuildOperation {
            center: point![center[0], center[1], center[2]],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Cube,
                mode,
                vector![size, size, size],
                material,
            ),
        }
    }

    /// Bounding box of solid voxels, inclusive.
    fn solid_bounds(chunk: &Chunk) -> Option<([usize; 3], [usize; 3])> {
        let mut bounds: Option<([usize; 3], [usize; 3])> = None;
        for z in 0..CHUNK_LENGTH {
            for y in 0..CHUNK_LENGTH {
                for x in 0..CHUNK_LENGTH {
                    if !chunk.get(x, y, z).is_solid() {
                        continue;
                    }
                    bounds = Some(match bounds {
                        None => ([x, y, z], [x, y, z]),
                        Some(([x0, y0, z0], [x1, y1, z1])) => (
                            [x0.min(x), y0.min(y), z0.min(z)],
                            [x1.max(x), y1.max(y), z1.max(z)],
                        ),
                    });
                }
            }
        }
        bounds
    }

    #[test]
    fn cube_add_fills_the_expected_box() {
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        // center (4m, 4m, 4m) = voxel 16, full extent 2m = 8 voxels
        let op = cube_op(BuildMode::Add, [4.0, 4.0, 4.0], 2.0, 7);

        assert!(draw_operation(&mut chunk, &op));

        let ([x0, y0, z0], [x1, y1, z1]) = solid_bounds(&chunk).expect("something was drawn");
        // half extent 4 voxels around voxel 16, with the transition band
        // never reconstructing solid outside one extra voxel
        for (lo, hi) in [(x0, x1), (y0, y1), (z0, z1)] {
            assert!(lo >= 11 && lo <= 13, "low bound {} out of range", lo);
            assert!(hi >= 19 && hi <= 21, "high bound {} out of range", hi);
        }
        assert!(chunk.get(16, 16, 16).is_solid());
        assert_eq!(chunk.get(16, 16, 16).material(), 7);
        assert!(!chunk.get(5, 16, 16).is_solid());
    }

    #[test]
    fn subtract_carves_and_keeps_material() {
        let mut chunk = Chunk::flat(ChunkPos::new([0, 0, 0]), 32, 3);
        let op = cube_op(BuildMode::Subtract, [4.0, 4.0, 4.0], 2.0, 9);

        assert!(draw_operation(&mut chunk, &op));
        assert!(!chunk.get(16, 16, 16).is_solid());
        // carving never repaints
        assert_eq!(chunk.get(16, 16, 16).material(), 3);
        assert!(chunk.get(16, 2, 16).is_solid());
    }

    #[test]
    fn subtract_of_degenerate_size_changes_nothing() {
        let mut chunk = Chunk::flat(ChunkPos::new([0, 0, 0]), 32, 3);
        let before = chunk.to_dense();

        let mut op = cube_op(BuildMode::Subtract, [4.0, 4.0, 4.0], 2.0, 9);
        op.config.size.y = 0.0;

        assert!(!draw_operation(&mut chunk, &op));
        assert_eq!(chunk.to_dense(), before);
    }

    #[test]
    fn paint_changes_material_of_solid_voxels_only() {
        let mut chunk = Chunk::flat(ChunkPos::new([0, 0, 0]), 17, 3);
        let op = cube_op(BuildMode::Paint, [4.0, 4.0, 4.0], 2.0, 9);

        assert!(draw_operation(&mut chunk, &op));
        // inside the shape and solid: repainted, weight untouched
        let painted = chunk.get(16, 14, 16);
        assert_eq!(painted.material(), 9);
        assert!(painted.is_solid());
        // inside the shape but air: untouched
        assert!(!chunk.get(16, 18, 16).is_solid());
        assert_eq!(chunk.get(16, 18, 16).material(), 0);
        // outside the shape: old material
        assert_eq!(chunk.get(2, 14, 2).material(), 3);
    }

    #[test]
    fn fill_only_claims_air() {
        let mut chunk = Chunk::flat(ChunkPos::new([0, 0, 0]), 17, 3);
        let op = cube_op(BuildMode::Fill, [4.0, 4.0, 4.0], 2.0, 9);

        assert!(draw_operation(&mut chunk, &op));
        // air inside the shape becomes the fill material
        let filled = chunk.get(16, 18, 16);
        assert!(filled.is_solid());
        assert_eq!(filled.material(), 9);
        // existing terrain keeps both weight and material
        let kept = chunk.get(16, 14, 16);
        assert_eq!(kept.material(), 3);
    }

    #[test]
    fn add_respects_rotation() {
        let mut flat = Chunk::empty(ChunkPos::new([0, 0, 0]));
        let mut rotated = Chunk::empty(ChunkPos::new([0, 0, 0]));

        let mut op = BuildOperation {
            center: point![4.0, 4.0, 4.0],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Cube,
                BuildMode::Add,
                vector![3.0, 0.6, 0.6],
                1,
            ),
        };
        draw_operation(&mut flat, &op);

        op.rotation =
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::FRAC_PI_2);
        draw_operation(&mut rotated, &op);

        let ([fx0, _, fz0], [fx1, _, fz1]) = solid_bounds(&flat).unwrap();
        let ([rx0, _, rz0], [rx1, _, rz1]) = solid_bounds(&rotated).unwrap();

        // the long axis swaps from x to z under a quarter turn
        assert!(fx1 - fx0 > fz1 - fz0);
        assert!(rz1 - rz0 > rx1 - rx0);
    }

    #[test]
    fn draw_reports_unchanged_when_op_misses_chunk() {
        let mut chunk = Chunk::empty(ChunkPos::new([10, 10, 10]));
        let op = cube_op(BuildMode::Add, [4.0, 4.0, 4.0], 2.0, 7);
        assert!(!draw_operation(&mut chunk, &op));
    }

    #[test]
    fn boundary_changes_flag_the_spilled_faces() {
        use crate::Face;

        // centered inside the chunk: no neighbor affected
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        let op = cube_op(BuildMode::Add, [4.0, 4.0, 4.0], 2.0, 7);
        let outcome = draw_operation_outcome(&mut chunk, &op);
        assert!(outcome.changed);
        assert!(outcome.boundary.is_empty());

        // hugging the +x face: only that neighbor needs a re-mesh
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        let op = cube_op(BuildMode::Add, [7.8, 4.0, 4.0], 2.0, 7);
        let outcome = draw_operation_outcome(&mut chunk, &op);
        assert!(outcome.changed);
        assert!(outcome.boundary.contains(Face::PosX));
        assert!(!outcome.boundary.contains(Face::NegX));
        assert!(!outcome.boundary.contains(Face::PosY));
    }

    #[test]
    fn hollow_cubes_keep_an_empty_core() {
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        let mut op = cube_op(BuildMode::Add, [4.0, 4.0, 4.0], 3.0, 7);
        op.config.thickness = Some(0.5);

        assert!(draw_operation(&mut chunk, &op));
        // the wall is solid, the core is not
        assert!(chunk.get(16, 16, 10).is_solid());
        assert!(!chunk.get(16, 16, 16).is_solid());
    }

    #[test]
    fn arc_sweep_limits_a_cylinder_to_a_wedge() {
        let mut chunk = Chunk::empty(ChunkPos::new([0, 0, 0]));
        let mut op = BuildOperation {
            center: point![4.0, 4.0, 4.0],
            rotation: UnitQuaternion::identity(),
            config: BuildConfig::solid(
                BuildShape::Cylinder,
                BuildMode::Add,
                vector![3.0, 2.0, 3.0],
                7,
            ),
        };
        op.config.arc_sweep = Some(std::f32::consts::FRAC_PI_2);

        assert!(draw_operation(&mut chunk, &op));
        // +x lies inside the quarter wedge (the sweep straddles +x)...
        assert!(chunk.get(20, 16, 16).is_solid());
        // ...while -x is far outside it
        assert!(!chunk.get(12, 16, 16).is_solid());
    }
}
