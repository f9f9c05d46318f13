//! GPU runtime management for CubeCL CUDA execution.
//!
//! Owns the CUDA device and compute client and wraps the per-layer query
//! kernels behind host-slice APIs: upload the staged layer and the query
//! batch, launch one thread per query row, read the output rows back.
//!
//! The `read_one` after each launch is the batch's synchronization point;
//! there is no other ordering between host and device.

use anyhow::Result;
use cubecl::cuda::{CudaDevice, CudaRuntime};
use cubecl::prelude::*;

use crate::query::kernels::{
    esdf_query_kernel, feature_query_kernel, occupancy_query_kernel, tsdf_query_kernel,
};
use crate::query::stager::{StagedLayer, FEATURE_STRIDE};

/// Type alias for CUDA compute client
type CudaClient =
    ComputeClient<<CudaRuntime as Runtime>::Server, <CudaRuntime as Runtime>::Channel>;

const CUBE_DIM: u32 = 256;

/// GPU runtime for batched voxel queries.
pub struct GpuRuntime {
    /// CUDA device (kept alive for runtime lifetime)
    #[allow(dead_code)]
    device: CudaDevice,
    /// Compute client for kernel execution
    client: CudaClient,
}

impl GpuRuntime {
    /// Create a new GPU runtime with the default CUDA device.
    pub fn new() -> Result<Self> {
        Self::with_device_id(0)
    }

    /// Create a new GPU runtime with a specific CUDA device.
    pub fn with_device_id(device_id: usize) -> Result<Self> {
        let device = CudaDevice::new(device_id);
        let client = CudaRuntime::client(&device);

        Ok(Self { device, client })
    }

    /// Get the underlying compute client.
    pub fn client(&self) -> &CudaClient {
        &self.client
    }

    /// Run the ESDF kernel over `queries` (`[x, y, z, radius]` rows).
    /// Returns `N x 1` or `N x 4` rows depending on `with_gradient`.
    pub fn query_esdf(
        &self,
        staged: &StagedLayer,
        queries: &[[f32; 4]],
        with_gradient: bool,
    ) -> Result<Vec<f32>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let num_queries = queries.len();
        let out_cols: usize = if with_gradient { 4 } else { 1 };
        let queries_flat: Vec<f32> = queries.iter().flat_map(|q| q.iter().copied()).collect();

        // A fully empty layer has no payload; the kernel never reads it in
        // that case but the buffer must still exist.
        let payload: &[f32] = if staged.payload.is_empty() {
            &[0.0]
        } else {
            &staged.payload
        };

        let queries_gpu = self.client.create(f32::as_bytes(&queries_flat));
        let table_offsets_gpu = self.client.create(u32::as_bytes(&staged.table_offsets));
        let pool_offsets_gpu = self.client.create(u32::as_bytes(&staged.pool_offsets));
        let keys_gpu = self.client.create(i32::as_bytes(&staged.keys));
        let block_slots_gpu = self.client.create(u32::as_bytes(&staged.block_slots));
        let voxel_sizes_gpu = self.client.create(f32::as_bytes(&staged.voxel_sizes));
        let payload_gpu = self.client.create(f32::as_bytes(payload));
        let out_gpu = self
            .client
            .empty(num_queries * out_cols * std::mem::size_of::<f32>());

        let cube_count = num_queries.div_ceil(CUBE_DIM as usize) as u32;
        unsafe {
            esdf_query_kernel::launch_unchecked::<f32, CudaRuntime>(
                &self.client,
                CubeCount::Static(cube_count, 1, 1),
                CubeDim::new(CUBE_DIM, 1, 1),
                ArrayArg::from_raw_parts::<f32>(&queries_gpu, num_queries * 4, 1),
                ArrayArg::from_raw_parts::<u32>(&table_offsets_gpu, staged.table_offsets.len(), 1),
                ArrayArg::from_raw_parts::<u32>(&pool_offsets_gpu, staged.pool_offsets.len(), 1),
                ArrayArg::from_raw_parts::<i32>(&keys_gpu, staged.keys.len(), 1),
                ArrayArg::from_raw_parts::<u32>(&block_slots_gpu, staged.block_slots.len(), 1),
                ArrayArg::from_raw_parts::<f32>(&voxel_sizes_gpu, staged.voxel_sizes.len(), 1),
                ArrayArg::from_raw_parts::<f32>(&payload_gpu, payload.len(), 1),
                ScalarArg::new(num_queries as u32),
                ScalarArg::new(staged.num_submaps() as u32),
                ScalarArg::new(out_cols as u32),
                ArrayArg::from_raw_parts::<f32>(&out_gpu, num_queries * out_cols, 1),
            );
        }

        let out_bytes = self.client.read_one(out_gpu.binding());
        Ok(f32::from_bytes(&out_bytes).to_vec())
    }

    /// Run the TSDF kernel. Returns `N x 2` rows (`[distance, weight]`).
    pub fn query_tsdf(&self, staged: &StagedLayer, queries: &[[f32; 3]]) -> Result<Vec<f32>> {
        self.launch_point_kernel(staged, queries, 2, PointKernel::Tsdf)
    }

    /// Run the occupancy kernel. Returns `N x 1` rows (`[log_odds]`).
    pub fn query_occupancy(&self, staged: &StagedLayer, queries: &[[f32; 3]]) -> Result<Vec<f32>> {
        self.launch_point_kernel(staged, queries, 1, PointKernel::Occupancy)
    }

    /// Run the feature kernel. Returns `N x 33` rows (`[f0 .. f31, weight]`).
    pub fn query_feature(&self, staged: &StagedLayer, queries: &[[f32; 3]]) -> Result<Vec<f32>> {
        self.launch_point_kernel(staged, queries, FEATURE_STRIDE, PointKernel::Feature)
    }

    /// Shared launch path for the three kernels with `N x 3` query rows.
    /// They take identical argument lists and differ only in the kernel and
    /// the output width.
    fn launch_point_kernel(
        &self,
        staged: &StagedLayer,
        queries: &[[f32; 3]],
        out_cols: usize,
        kernel: PointKernel,
    ) -> Result<Vec<f32>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let num_queries = queries.len();
        let queries_flat: Vec<f32> = queries.iter().flat_map(|q| q.iter().copied()).collect();

        let payload: &[f32] = if staged.payload.is_empty() {
            &[0.0]
        } else {
            &staged.payload
        };

        let queries_gpu = self.client.create(f32::as_bytes(&queries_flat));
        let table_offsets_gpu = self.client.create(u32::as_bytes(&staged.table_offsets));
        let pool_offsets_gpu = self.client.create(u32::as_bytes(&staged.pool_offsets));
        let keys_gpu = self.client.create(i32::as_bytes(&staged.keys));
        let block_slots_gpu = self.client.create(u32::as_bytes(&staged.block_slots));
        let voxel_sizes_gpu = self.client.create(f32::as_bytes(&staged.voxel_sizes));
        let payload_gpu = self.client.create(f32::as_bytes(payload));
        let out_gpu = self
            .client
            .empty(num_queries * out_cols * std::mem::size_of::<f32>());

        let cube_count = num_queries.div_ceil(CUBE_DIM as usize) as u32;
        macro_rules! launch {
            ($kernel:ident) => {
                unsafe {
                    $kernel::launch_unchecked::<f32, CudaRuntime>(
                        &self.client,
                        CubeCount::Static(cube_count, 1, 1),
                        CubeDim::new(CUBE_DIM, 1, 1),
                        ArrayArg::from_raw_parts::<f32>(&queries_gpu, num_queries * 3, 1),
                        ArrayArg::from_raw_parts::<u32>(
                            &table_offsets_gpu,
                            staged.table_offsets.len(),
                            1,
                        ),
                        ArrayArg::from_raw_parts::<u32>(
                            &pool_offsets_gpu,
                            staged.pool_offsets.len(),
                            1,
                        ),
                        ArrayArg::from_raw_parts::<i32>(&keys_gpu, staged.keys.len(), 1),
                        ArrayArg::from_raw_parts::<u32>(
                            &block_slots_gpu,
                            staged.block_slots.len(),
                            1,
                        ),
                        ArrayArg::from_raw_parts::<f32>(
                            &voxel_sizes_gpu,
                            staged.voxel_sizes.len(),
                            1,
                        ),
                        ArrayArg::from_raw_parts::<f32>(&payload_gpu, payload.len(), 1),
                        ScalarArg::new(num_queries as u32),
                        ScalarArg::new(staged.num_submaps() as u32),
                        ArrayArg::from_raw_parts::<f32>(&out_gpu, num_queries * out_cols, 1),
                    );
                }
            };
        }

        match kernel {
            PointKernel::Tsdf => launch!(tsdf_query_kernel),
            PointKernel::Occupancy => launch!(occupancy_query_kernel),
            PointKernel::Feature => launch!(feature_query_kernel),
        }

        let out_bytes = self.client.read_one(out_gpu.binding());
        Ok(f32::from_bytes(&out_bytes).to_vec())
    }
}

#[derive(Clone, Copy)]
enum PointKernel {
    Tsdf,
    Occupancy,
    Feature,
}

/// Check if CUDA is available on this system.
pub fn is_cuda_available() -> bool {
    // Try to create a device - if it fails, CUDA is not available
    std::panic::catch_unwind(|| {
        let _device = CudaDevice::new(0);
    })
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::stager::stage_esdf;
    use crate::submap::Submap;
    use crate::voxel::{EsdfVoxel, ESDF_UNKNOWN_DISTANCE};

    /// Skip test at runtime if CUDA is not available.
    macro_rules! require_cuda {
        () => {
            if !is_cuda_available() {
                eprintln!("Skipping test: CUDA not available");
                return;
            }
        };
    }

    #[test]
    fn test_cuda_availability() {
        let _available = is_cuda_available();
        eprintln!("CUDA available: {_available}");
    }

    #[test]
    fn test_esdf_kernel_roundtrip() {
        require_cuda!();

        let runtime = GpuRuntime::new().expect("Failed to create GPU runtime");

        let mut submap = Submap::new(0.1);
        submap.set_esdf_voxel(
            [0.05, 0.05, 0.05],
            EsdfVoxel {
                squared_distance_vox: 100.0,
                is_inside: false,
                observed: true,
                parent_direction: [1, 0, 0],
            },
        );
        let staged = stage_esdf(&[&submap]);

        let out = runtime
            .query_esdf(
                &staged,
                &[[0.05, 0.05, 0.05, 0.0], [9.0, 9.0, 9.0, 0.0]],
                false,
            )
            .unwrap();

        assert!((out[0] - 1.0).abs() < 1e-5, "hit row: {out:?}");
        assert_eq!(out[1], ESDF_UNKNOWN_DISTANCE);
    }
}
