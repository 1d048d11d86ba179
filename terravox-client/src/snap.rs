//! Build-preview snapping. Past placements deposit shape-local snap points
//! into a bounded FIFO; a new preview finds the closest (deposited,
//! current) pair and offsets itself by their delta so adjoining builds line
//! up exactly.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use std::collections::VecDeque;

use terravox_common::build::BuildShape;

pub const SNAP_DISTANCE_MAX: f32 = 1.0;
pub const SNAP_MARKER_COUNT_MAX: usize = 256;

/// Two deposited points closer than this collapse into one.
const SNAP_DEDUP_DISTANCE: f32 = 0.01;

/// Shape-local snap points for a build preset.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapPreset {
    points: Vec<Point3<f32>>,
}

impl SnapPreset {
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        Self { points }
    }

    /// The natural snap set per shape: corners for boxy shapes, axis poles
    /// and rim cardinals for round ones.
    pub fn for_shape(shape: BuildShape, size: Vector3<f32>) -> Self {
        let half = size * 0.5;
        let points = match shape {
            BuildShape::Cube | BuildShape::Prism => {
                let mut corners = Vec::with_capacity(8);
                for &x in &[-half.x, half.x] {
                    for &y in &[-half.y, half.y] {
                        for &z in &[-half.z, half.z] {
                            corners.push(Point3::new(x, y, z));
                        }
                    }
                }
                corners
            }
            BuildShape::Sphere | BuildShape::Cylinder => vec![
                Point3::new(0.0, half.y, 0.0),
                Point3::new(0.0, -half.y, 0.0),
                Point3::new(half.x, 0.0, 0.0),
                Point3::new(-half.x, 0.0, 0.0),
                Point3::new(0.0, 0.0, half.z),
                Point3::new(0.0, 0.0, -half.z),
            ],
        };
        Self { points }
    }

    fn world_points(
        &self,
        center: Point3<f32>,
        rotation: UnitQuaternion<f32>,
    ) -> impl Iterator<Item = Point3<f32>> + '_ {
        self.points
            .iter()
            .map(move |&local| center + rotation.transform_vector(&local.coords))
    }
}

#[derive(Default)]
pub struct SnapManager {
    deposited: VecDeque<Point3<f32>>,
}

impl SnapManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker_count(&self) -> usize {
        self.deposited.len()
    }

    pub fn clear(&mut self) {
        self.deposited.clear();
    }

    /// Offset that moves the preview so its nearest snap point lands on the
    /// nearest deposited one, if any pair is within range. The returned
    /// delta is `deposited - current`, i.e. add it to the preview center.
    pub fn try_snap(
        &self,
        preset: &SnapPreset,
        center: Point3<f32>,
        rotation: UnitQuaternion<f32>,
    ) -> Option<Vector3<f32>> {
        let mut best: Option<(f32, Vector3<f32>)> = None;

        for current in preset.world_points(center, rotation) {
            for &deposited in self.deposited.iter() {
                let delta = deposited - current;
                let distance = delta.norm();
                if distance > SNAP_DISTANCE_MAX {
                    continue;
                }
                match best {
                    Some((best_distance, _)) if best_distance <= distance => {}
                    _ => best = Some((distance, delta)),
                }
            }
        }

        best.map(|(_, delta)| delta)
    }

    /// Record a placement's snap points, deduping near-coincident markers
    /// and evicting the oldest beyond the cap.
    pub fn deposit(
        &mut self,
        preset: &SnapPreset,
        center: Point3<f32>,
        rotation: UnitQuaternion<f32>,
    ) {
        for point in preset.world_points(center, rotation) {
            let duplicate = self
                .deposited
                .iter()
                .any(|existing| (existing - point).norm() < SNAP_DEDUP_DISTANCE);
            if duplicate {
                continue;
            }
            if self.deposited.len() == SNAP_MARKER_COUNT_MAX {
                self.deposited.pop_front();
            }
            self.deposited.push_back(point);
        }
    }
}
