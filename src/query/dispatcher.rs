//! Backend selection and the public query entry points.
//!
//! A [`QueryEngine`] is created once and reused across batches. Every call
//! borrows the submap set for its full duration, resolves the selector,
//! and runs the batch on the configured backend. The CPU and GPU paths
//! produce the same rows; which one runs is invisible to the caller apart
//! from timing.

use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::query::cpu;
use crate::query::stager;
use crate::query::types::{with_zero_radii, QueryBackend, SubmapSelector};
use crate::runtime::{is_cuda_available, GpuRuntime};
use crate::submap::{Submap, SubmapSet};

/// Batched query dispatcher over a CPU or GPU backend.
pub struct QueryEngine {
    gpu: Option<GpuRuntime>,
}

impl QueryEngine {
    /// Engine running on the CPU reference path.
    pub fn cpu() -> Self {
        Self { gpu: None }
    }

    /// Engine running on the default CUDA device. Fails if no device can
    /// be initialized.
    pub fn gpu() -> anyhow::Result<Self> {
        let runtime = GpuRuntime::new()?;
        Ok(Self { gpu: Some(runtime) })
    }

    /// GPU if CUDA is available, CPU otherwise.
    pub fn auto() -> Self {
        if is_cuda_available() {
            match GpuRuntime::new() {
                Ok(runtime) => {
                    info!("query engine using CUDA backend");
                    return Self { gpu: Some(runtime) };
                }
                Err(err) => {
                    warn!("CUDA detected but runtime init failed, falling back to CPU: {err}");
                }
            }
        } else {
            info!("CUDA not available, query engine using CPU backend");
        }
        Self::cpu()
    }

    pub fn backend(&self) -> QueryBackend {
        if self.gpu.is_some() {
            QueryBackend::Gpu
        } else {
            QueryBackend::Cpu
        }
    }

    fn select<'a>(
        set: &'a SubmapSet,
        selector: SubmapSelector,
    ) -> Result<Vec<&'a Submap>, QueryError> {
        if set.is_empty() {
            warn!("query rejected: submap set is empty");
            return Err(QueryError::EmptySubmapSet);
        }
        match selector {
            SubmapSelector::All => Ok(set.iter().collect()),
            SubmapSelector::Single(index) => match set.get(index) {
                Some(submap) => Ok(vec![submap]),
                None => {
                    warn!(index, len = set.len(), "query rejected: submap index out of range");
                    Err(QueryError::SubmapIndexOutOfRange {
                        index,
                        len: set.len(),
                    })
                }
            },
        }
    }

    /// ESDF sphere query. `queries` rows are `[x, y, z, radius]`; the
    /// output is row-major `N x 1` (`[distance]`) or `N x 4`
    /// (`[gx, gy, gz, distance]`).
    pub fn query_esdf(
        &self,
        set: &SubmapSet,
        selector: SubmapSelector,
        queries: &[[f32; 4]],
        with_gradient: bool,
    ) -> Result<Vec<f32>, QueryError> {
        let submaps = Self::select(set, selector)?;
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            num_queries = queries.len(),
            num_submaps = submaps.len(),
            with_gradient,
            "esdf query"
        );

        match &self.gpu {
            Some(runtime) => {
                let staged = stager::stage_esdf(&submaps);
                runtime
                    .query_esdf(&staged, queries, with_gradient)
                    .map_err(QueryError::Gpu)
            }
            None => Ok(cpu::query_esdf_cpu(&submaps, queries, with_gradient)),
        }
    }

    /// ESDF point query, the zero-radius special case of [`query_esdf`].
    ///
    /// [`query_esdf`]: Self::query_esdf
    pub fn query_esdf_points(
        &self,
        set: &SubmapSet,
        selector: SubmapSelector,
        points: &[[f32; 3]],
        with_gradient: bool,
    ) -> Result<Vec<f32>, QueryError> {
        self.query_esdf(set, selector, &with_zero_radii(points), with_gradient)
    }

    /// TSDF point query. Output is row-major `N x 2`
    /// (`[distance, weight]`).
    pub fn query_tsdf(
        &self,
        set: &SubmapSet,
        selector: SubmapSelector,
        points: &[[f32; 3]],
    ) -> Result<Vec<f32>, QueryError> {
        let submaps = Self::select(set, selector)?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            num_queries = points.len(),
            num_submaps = submaps.len(),
            "tsdf query"
        );

        match &self.gpu {
            Some(runtime) => {
                let staged = stager::stage_tsdf(&submaps);
                runtime.query_tsdf(&staged, points).map_err(QueryError::Gpu)
            }
            None => Ok(cpu::query_tsdf_cpu(&submaps, points)),
        }
    }

    /// Occupancy point query, always reduced across the whole set. Output
    /// is row-major `N x 1` (`[log_odds]`).
    pub fn query_occupancy(
        &self,
        set: &SubmapSet,
        points: &[[f32; 3]],
    ) -> Result<Vec<f32>, QueryError> {
        let submaps = Self::select(set, SubmapSelector::All)?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            num_queries = points.len(),
            num_submaps = submaps.len(),
            "occupancy query"
        );

        match &self.gpu {
            Some(runtime) => {
                let staged = stager::stage_occupancy(&submaps);
                runtime
                    .query_occupancy(&staged, points)
                    .map_err(QueryError::Gpu)
            }
            None => Ok(cpu::query_occupancy_cpu(&submaps, points)),
        }
    }

    /// Feature point query against exactly one submap. Output is row-major
    /// `N x (FEATURE_ARRAY_NUM_ELEMENTS + 1)` (`[f0 .. f31, weight]`).
    pub fn query_feature(
        &self,
        set: &SubmapSet,
        submap_index: usize,
        points: &[[f32; 3]],
    ) -> Result<Vec<f32>, QueryError> {
        let submaps = Self::select(set, SubmapSelector::Single(submap_index))?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        debug!(num_queries = points.len(), submap_index, "feature query");

        match &self.gpu {
            Some(runtime) => {
                let staged = stager::stage_feature(&submaps);
                runtime
                    .query_feature(&staged, points)
                    .map_err(QueryError::Gpu)
            }
            None => Ok(cpu::query_feature_cpu(submaps[0], points)),
        }
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::cpu()
    }
}
