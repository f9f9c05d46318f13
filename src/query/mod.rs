//! Batched spatial queries against submap voxel layers.
//!
//! The pipeline is the same on both backends: resolve each query point to
//! a voxel address, extract the layer's value, reduce across submaps. The
//! CPU path ([`cpu`]) is the reference; the GPU path ([`kernels`] fed by
//! [`stager`]) mirrors it. [`dispatcher`] owns backend selection and the
//! public entry points.

pub mod cpu;
pub mod dispatcher;
pub mod extract;
pub mod kernels;
pub mod stager;
pub mod types;

pub use dispatcher::QueryEngine;
pub use types::{with_zero_radii, QueryBackend, SubmapSelector};
