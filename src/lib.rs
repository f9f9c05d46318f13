//! Batched spatial queries against block-sparse voxel submaps, with
//! CUDA acceleration via CubeCL.
//!
//! A deployment maintains a [`SubmapSet`] of independently built volumetric
//! maps, each carrying TSDF, ESDF, occupancy and feature voxel layers in
//! block hash tables. A [`QueryEngine`] answers large batches of point and
//! sphere queries against those layers, reducing across submaps where the
//! layer calls for it (minimum distance for SDF layers, maximum log-odds
//! for occupancy).
//!
//! # Example
//!
//! ```ignore
//! use voxmap_cuda::{QueryEngine, SubmapSelector, SubmapSet};
//!
//! let engine = QueryEngine::auto();
//! let distances = engine.query_esdf_points(&set, SubmapSelector::All, &points, false)?;
//! ```
//!
//! Both backends run the same resolve -> extract -> reduce pipeline; the
//! CPU path in [`query::cpu`] is the reference the GPU kernels are tested
//! against.

pub mod error;
pub mod hash_table;
pub mod indexing;
pub mod query;
pub mod runtime;
pub mod submap;
pub mod test_utils;
pub mod voxel;

pub use error::QueryError;
pub use query::{QueryBackend, QueryEngine, SubmapSelector};
pub use runtime::{is_cuda_available, GpuRuntime};
pub use submap::{Submap, SubmapSet, VoxelLayerType};
pub use voxel::{
    esdf_unknown_distance, feature_array_element_size, feature_array_num_elements, EsdfVoxel,
    FeatureVoxel, OccupancyVoxel, TsdfVoxel, ESDF_UNKNOWN_DISTANCE, FEATURE_ARRAY_NUM_ELEMENTS,
    VOXELS_PER_BLOCK, VOXELS_PER_SIDE,
};
