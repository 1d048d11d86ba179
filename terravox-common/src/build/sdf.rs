//! Signed distance fields for the four build shapes, in shape-local space.
//! Negative inside, positive outside, distances in meters.

use nalgebra::Vector3;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildShape {
    Cube = 0,
    Sphere = 1,
    Cylinder = 2,
    Prism = 3,
}

impl BuildShape {
    pub fn from_id(id: u8) -> Option<BuildShape> {
        match id {
            0 => Some(BuildShape::Cube),
            1 => Some(BuildShape::Sphere),
            2 => Some(BuildShape::Cylinder),
            3 => Some(BuildShape::Prism),
            _ => None,
        }
    }
}

/// Distance to weight with a one-voxel transition band around the zero
/// crossing. `d` in voxel units here.
pub fn sdf_to_weight(d: f32) -> f32 {
    (-d).max(-0.5).min(0.5)
}

/// Evaluate a shape at `p` (shape-local, meters) with half extents `half`.
pub fn shape_sdf(shape: BuildShape, p: Vector3<f32>, half: Vector3<f32>) -> f32 {
    match shape {
        BuildShape::Cube => cube_sdf(p, half),
        BuildShape::Sphere => sphere_sdf(p, half),
        BuildShape::Cylinder => cylinder_sdf(p, half),
        BuildShape::Prism => prism_sdf(p, half),
    }
}

fn cube_sdf(p: Vector3<f32>, half: Vector3<f32>) -> f32 {
    let dx = p.x.abs() - half.x;
    let dy = p.y.abs() - half.y;
    let dz = p.z.abs() - half.z;
    dx.max(dy).max(dz)
}

fn sphere_sdf(p: Vector3<f32>, half: Vector3<f32>) -> f32 {
    // normalized-ellipsoid distance, scaled back to meters by the smallest
    // semi-axis; exact for spheres, a usable bound for ellipsoids
    let scaled = Vector3::new(p.x / half.x, p.y / half.y, p.z / half.z);
    let min_axis = half.x.min(half.y).min(half.z);
    (scaled.norm() - 1.0) * min_axis
}

fn cylinder_sdf(p: Vector3<f32>, half: Vector3<f32>) -> f32 {
    // y axis, elliptical cross-section in xz
    let radial = {
        let scaled = Vector3::new(p.x / half.x, 0.0, p.z / half.z);
        (scaled.norm() - 1.0) * half.x.min(half.z)
    };
    let cap = p.y.abs() - half.y;
    radial.max(cap)
}

fn prism_sdf(p: Vector3<f32>, half: Vector3<f32>) -> f32 {
    // equilateral-triangle cross-section in xy, extruded along z
    let q = Vector3::new(p.x.abs() / half.x, p.y / half.y, p.z.abs() / half.z);
    let triangle = (q.x * 0.866_025 + q.y * 0.5).max(-q.y) - 0.5;
    let extrude = q.z - 1.0;
    triangle.max(extrude) * half.x.min(half.y).min(half.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::vector;

    const HALF: Vector3<f32> = vector![1.0, 1.0, 1.0];

    #[test]
    fn cube_distances() {
        assert_relative_eq!(cube_sdf(vector![0.0, 0.0, 0.0], HALF), -1.0);
        assert_relative_eq!(cube_sdf(vector![1.0, 0.0, 0.0], HALF), 0.0);
        assert_relative_eq!(cube_sdf(vector![1.5, 0.0, 0.0], HALF), 0.5);
        assert!(cube_sdf(vector![0.9, 0.9, 0.9], HALF) < 0.0);
    }

    #[test]
    fn sphere_distances() {
        assert_relative_eq!(sphere_sdf(vector![0.0, 0.0, 0.0], HALF), -1.0);
        assert_relative_eq!(sphere_sdf(vector![1.0, 0.0, 0.0], HALF), 0.0);
        assert_relative_eq!(sphere_sdf(vector![2.0, 0.0, 0.0], HALF), 1.0);
        // the cube corner is outside the unit sphere
        assert!(sphere_sdf(vector![0.9, 0.9, 0.9], HALF) > 0.0);
    }

    #[test]
    fn cylinder_contains_axis_and_caps() {
        assert!(cylinder_sdf(vector![0.0, 0.9, 0.0], HALF) < 0.0);
        assert!(cylinder_sdf(vector![0.0, 1.1, 0.0], HALF) > 0.0);
        assert_relative_eq!(cylinder_sdf(vector![1.0, 0.0, 0.0], HALF), 0.0);
        assert!(cylinder_sdf(vector![0.9, 0.0, 0.9], HALF) > 0.0);
    }

    #[test]
    fn prism_cross_section_is_triangular() {
        // near the bottom edge midpoint: inside
        assert!(prism_sdf(vector![0.0, -0.2, 0.0], HALF) < 0.0);
        // above the apex: outside
        assert!(prism_sdf(vector![0.0, 1.1, 0.0], HALF) > 0.0);
        // beyond the extrusion: outside
        assert!(prism_sdf(vector![0.0, 0.0, 1.2], HALF) > 0.0);
        // bottom corners stick out further than the top
        assert!(prism_sdf(vector![0.8, -0.3, 0.0], HALF) < prism_sdf(vector![0.8, 0.7, 0.0], HALF));
    }

    #[test]
    fn weight_band_is_one_voxel_wide() {
        assert_relative_eq!(sdf_to_weight(0.0), 0.0);
        assert_relative_eq!(sdf_to_weight(-2.0), 0.5);
        assert_relative_eq!(sdf_to_weight(2.0), -0.5);
        assert_relative_eq!(sdf_to_weight(0.25), -0.25);
        assert_relative_eq!(sdf_to_weight(-0.25), 0.25);
    }
}
