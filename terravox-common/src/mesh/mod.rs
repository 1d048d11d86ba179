//! Mesh extraction. The mesher itself is renderer-agnostic: it turns voxel
//! grids into flat attribute arrays and leaves GPU upload to whoever owns a
//! graphics device.

pub mod surface_nets;

pub use surface_nets::{
    fill_sample_grid, ChunkMesh, MeshSlot, SkipHighBoundary, SurfaceNetsMesher, SAMPLE_DIM,
    SAMPLE_VOLUME,
};
