//! Surface Nets over the packed voxel grid.
//!
//! The mesher works on an expanded 34-cubed sample grid: the chunk's 32
//! voxels plus two margin slabs per axis sampled from the `+` neighbors (see
//! [`get_with_margin`][crate::world::chunk::get_with_margin]). Every cell of
//! the 33-cubed cell grid that contains a sign change gets one vertex at the
//! mean of its edge crossings; faces are then stitched across the crossing
//! edges of the sample grid.
//!
//! Face ownership along chunk boundaries: a chunk emits edges whose base
//! coordinate along the edge axis is `<= 31` and whose transverse
//! coordinates are `>= 1`, which makes adjacent chunks tile the shared
//! band exactly once. When a `+` neighbor is missing, `skip_high_boundary`
//! suppresses the faces that would read its slab, so no phantom geometry
//! pops once the neighbor arrives.

use crate::{
    material::{MaterialType, MaterialTypeLut},
    voxel::Voxel,
    world::chunk::{get_with_margin, Chunk, HighNeighbors},
    CHUNK_LENGTH,
};

pub const SAMPLE_DIM: usize = CHUNK_LENGTH + 2;
pub const SAMPLE_VOLUME: usize = SAMPLE_DIM * SAMPLE_DIM * SAMPLE_DIM;

pub const CELL_DIM: usize = CHUNK_LENGTH + 1;
pub const CELL_VOLUME: usize = CELL_DIM * CELL_DIM * CELL_DIM;

#[inline(always)]
fn sample_index(x: usize, y: usize, z: usize) -> usize {
    x + y * SAMPLE_DIM + z * SAMPLE_DIM * SAMPLE_DIM
}

#[inline(always)]
fn cell_index(x: usize, y: usize, z: usize) -> usize {
    x + y * CELL_DIM + z * CELL_DIM * CELL_DIM
}

/// Expand a chunk into the mesher's sample grid. `out` must be
/// `SAMPLE_VOLUME` long.
pub fn fill_sample_grid(chunk: &Chunk, neighbors: &HighNeighbors, out: &mut [u16]) {
    assert_eq!(out.len(), SAMPLE_VOLUME);
    for z in 0..SAMPLE_DIM {
        for y in 0..SAMPLE_DIM {
            for x in 0..SAMPLE_DIM {
                out[sample_index(x, y, z)] = get_with_margin(chunk, x, y, z, neighbors).bits();
            }
        }
    }
}

/// Per-axis flags: `true` suppresses faces that depend on that axis's high
/// margin slab, because the neighbor chunk is not available yet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SkipHighBoundary {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl SkipHighBoundary {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            x: true,
            y: true,
            z: true,
        }
    }

    pub fn from_missing(missing: [bool; 3]) -> Self {
        Self {
            x: missing[0],
            y: missing[1],
            z: missing[2],
        }
    }

    fn axis(&self, axis: usize) -> bool {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

/// One output stream of the mesher. Vertices are already expanded to
/// per-face triples (flat shading), so `indices` is a plain running
/// sequence grouped in threes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshSlot {
    /// xyz per vertex, chunk-local voxel units
    pub positions: Vec<f32>,
    /// xyz per vertex, unit length
    pub normals: Vec<f32>,
    pub material_ids: Vec<u8>,
    /// how strongly the vertex's material dominated its cell, 0..=255
    pub material_weights: Vec<u8>,
    /// sunlight at the vertex, 0..=255
    pub light_levels: Vec<u8>,
    pub indices: Vec<u32>,
}

impl MeshSlot {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.material_ids.clear();
        self.material_weights.clear();
        self.light_levels.clear();
        self.indices.clear();
    }

    fn push_triangle(&mut self, corners: [&CellVertex; 3]) {
        let [a, b, c] = corners;
        let u = [
            b.pos[0] - a.pos[0],
            b.pos[1] - a.pos[1],
            b.pos[2] - a.pos[2],
        ];
        let v = [
            c.pos[0] - a.pos[0],
            c.pos[1] - a.pos[1],
            c.pos[2] - a.pos[2],
        ];
        let normal = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        let length = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
        if length < 1e-8 {
            return;
        }
        let normal = [normal[0] / length, normal[1] / length, normal[2] / length];

        let base = self.vertex_count() as u32;
        for vertex in corners {
            self.positions.extend_from_slice(&vertex.pos);
            self.normals.extend_from_slice(&normal);
            self.material_ids.push(vertex.material);
            self.material_weights.push(vertex.material_weight);
            self.light_levels.push(vertex.light);
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub solid: MeshSlot,
    pub transparent: MeshSlot,
    pub liquid: MeshSlot,
}

impl ChunkMesh {
    pub fn is_empty(&self) -> bool {
        self.solid.is_empty() && self.transparent.is_empty() && self.liquid.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.solid.triangle_count()
            + self.transparent.triangle_count()
            + self.liquid.triangle_count()
    }

    pub fn slot(&self, material_type: MaterialType) -> &MeshSlot {
        match material_type {
            MaterialType::Solid => &self.solid,
            MaterialType::Transparent => &self.transparent,
            MaterialType::Liquid => &self.liquid,
        }
    }

    fn slot_mut(&mut self, material_type: MaterialType) -> &mut MeshSlot {
        match material_type {
            MaterialType::Solid => &mut self.solid,
            MaterialType::Transparent => &mut self.transparent,
            MaterialType::Liquid => &mut self.liquid,
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct CellVertex {
    pos: [f32; 3],
    material: u8,
    material_weight: u8,
    light: u8,
}

const NO_CELL: u32 = u32::MAX;

// cube corner k has offsets (k & 1, k >> 1 & 1, k >> 2 & 1)
const EDGE_CORNERS: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Reusable mesher state; one per worker.
pub struct SurfaceNetsMesher {
    cell_vertex: Vec<u32>,
    vertices: Vec<CellVertex>,
}

impl Default for SurfaceNetsMesher {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceNetsMesher {
    pub fn new() -> Self {
        Self {
            cell_vertex: vec![NO_CELL; CELL_VOLUME],
            vertices: Vec::new(),
        }
    }

    pub fn mesh(
        &mut self,
        grid: &[u16],
        lut: &MaterialTypeLut,
        skip: SkipHighBoundary,
    ) -> ChunkMesh {
        assert_eq!(grid.len(), SAMPLE_VOLUME);

        self.cell_vertex.iter_mut().for_each(|slot| *slot = NO_CELL);
        self.vertices.clear();

        self.place_vertices(grid);

        let mut mesh = ChunkMesh::default();
        self.emit_faces(grid, lut, skip, &mut mesh);
        mesh
    }

    fn place_vertices(&mut self, grid: &[u16]) {
        for cz in 0..CELL_DIM {
            for cy in 0..CELL_DIM {
                for cx in 0..CELL_DIM {
                    let mut corners = [Voxel(0); 8];
                    let mut solid_mask = 0u8;
                    for (k, corner) in corners.iter_mut().enumerate() {
                        let voxel = Voxel(
                            grid[sample_index(cx + (k & 1), cy + (k >> 1 & 1), cz + (k >> 2 & 1))],
                        );
                        if voxel.is_solid() {
                            solid_mask |= 1 << k;
                        }
                        *corner = voxel;
                    }

                    if solid_mask == 0 || solid_mask == 0xff {
                        continue;
                    }

                    let vertex = build_cell_vertex([cx, cy, cz], &corners, solid_mask);
                    self.cell_vertex[cell_index(cx, cy, cz)] = self.vertices.len() as u32;
                    self.vertices.push(vertex);
                }
            }
        }
    }

    fn emit_faces(
        &self,
        grid: &[u16],
        lut: &MaterialTypeLut,
        skip: SkipHighBoundary,
        mesh: &mut ChunkMesh,
    ) {
        for axis in 0..3usize {
            let u_axis = (axis + 1) % 3;
            let v_axis = (axis + 2) % 3;

            // base along the edge axis: 0..=31 (base 32 belongs to the `+`
            // neighbor); transverse: 1..=32 (transverse 0 belongs to the `-`
            // neighbor)
            for base_a in 0..CHUNK_LENGTH {
                for base_u in 1..=CHUNK_LENGTH {
                    if skip.axis(u_axis) && base_u == CHUNK_LENGTH {
                        continue;
                    }
                    for base_v in 1..=CHUNK_LENGTH {
                        if skip.axis(v_axis) && base_v == CHUNK_LENGTH {
                            continue;
                        }

                        let mut s = [0usize; 3];
                        s[axis] = base_a;
                        s[u_axis] = base_u;
                        s[v_axis] = base_v;

                        let low = Voxel(grid[sample_index(s[0], s[1], s[2])]);
                        let mut high_pos = s;
                        high_pos[axis] += 1;
                        let high = Voxel(grid[sample_index(high_pos[0], high_pos[1], high_pos[2])]);

                        if low.is_solid() == high.is_solid() {
                            continue;
                        }

                        // the face's slot follows the solid side of the edge
                        let solid_material = if low.is_solid() {
                            low.material()
                        } else {
                            high.material()
                        };
                        let slot = mesh.slot_mut(lut.material_type(solid_material));

                        let cell_at = |du: usize, dv: usize| -> Option<&CellVertex> {
                            let mut c = [0usize; 3];
                            c[axis] = base_a;
                            c[u_axis] = base_u - 1 + du;
                            c[v_axis] = base_v - 1 + dv;
                            let index = self.cell_vertex[cell_index(c[0], c[1], c[2])];
                            if index == NO_CELL {
                                return None;
                            }
                            Some(&self.vertices[index as usize])
                        };

                        // every cell around a crossing edge contains a sign
                        // change itself, so all four vertices exist
                        let (q00, q10, q11, q01) =
                            match (cell_at(0, 0), cell_at(1, 0), cell_at(1, 1), cell_at(0, 1)) {
                                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                                _ => continue,
                            };

                        // the cycle [q00, q10, q11, q01] winds so the normal
                        // points along +axis; flip it when the solid side is
                        // the high sample
                        if low.is_solid() {
                            slot.push_triangle([q00, q10, q11]);
                            slot.push_triangle([q00, q11, q01]);
                        } else {
                            slot.push_triangle([q00, q01, q11]);
                            slot.push_triangle([q00, q11, q10]);
                        }
                    }
                }
            }
        }
    }
}

fn build_cell_vertex(cell: [usize; 3], corners: &[Voxel; 8], solid_mask: u8) -> CellVertex {
    // vertex position: mean of the zero crossings on the cube's edges,
    // linear in weight; samples sit at voxel centers, i.e. index + 0.5
    let mut sum = [0.0f32; 3];
    let mut crossings = 0u32;
    for &(c0, c1) in EDGE_CORNERS.iter() {
        let solid0 = solid_mask & 1 << c0 != 0;
        let solid1 = solid_mask & 1 << c1 != 0;
        if solid0 == solid1 {
            continue;
        }

        let w0 = corners[c0].weight();
        let w1 = corners[c1].weight();
        let t = w0 / (w0 - w1);

        let p0 = [(c0 & 1) as f32, (c0 >> 1 & 1) as f32, (c0 >> 2 & 1) as f32];
        let p1 = [(c1 & 1) as f32, (c1 >> 1 & 1) as f32, (c1 >> 2 & 1) as f32];
        for i in 0..3 {
            sum[i] += p0[i] + t * (p1[i] - p0[i]);
        }
        crossings += 1;
    }

    let mut pos = [0.0f32; 3];
    for i in 0..3 {
        pos[i] = cell[i] as f32 + 0.5 + sum[i] / crossings as f32;
    }

    // dominant material over the solid corners, ties to the lowest id
    let mut counts = [(0u8, 0u8); 8];
    let mut distinct = 0usize;
    let mut solid_corners = 0u32;
    let mut light_sum = 0u32;
    let mut air_corners = 0u32;
    for (k, voxel) in corners.iter().enumerate() {
        if solid_mask & 1 << k == 0 {
            light_sum += voxel.light() as u32;
            air_corners += 1;
            continue;
        }
        solid_corners += 1;
        let material = voxel.material();
        match counts[..distinct].iter_mut().find(|(id, _)| *id == material) {
            Some((_, count)) => *count += 1,
            None => {
                counts[distinct] = (material, 1);
                distinct += 1;
            }
        }
    }

    let (material, dominant_count) = counts[..distinct]
        .iter()
        .copied()
        .max_by(|(id_a, count_a), (id_b, count_b)| {
            count_a.cmp(count_b).then(id_b.cmp(id_a))
        })
        .unwrap_or((0, 0));

    let light = if air_corners > 0 {
        (light_sum * 255 / (air_corners * crate::voxel::LIGHT_MAX as u32)).min(255) as u8
    } else {
        0
    };

    CellVertex {
        pos,
        material,
        material_weight: (dominant_count as u32 * 255 / solid_corners.max(1)).min(255) as u8,
        light,
    }
}
