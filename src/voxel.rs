//! Voxel variants, fixed-size voxel blocks, and the engine's sentinel
//! constants.
//!
//! Each voxel layer stores exactly one of the variants below. Blocks are
//! 8x8x8 cubes stored contiguously; they are the unit of allocation in the
//! block hash table.

use half::f16;

/// Number of voxels along one side of a block. Compile-time constant,
/// identical across all submaps of a deployment.
pub const VOXELS_PER_SIDE: usize = 8;

/// log2 of [`VOXELS_PER_SIDE`], used for shift-based floor division.
pub const VOXELS_PER_SIDE_LOG2: u32 = 3;

/// Voxels per block (8^3).
pub const VOXELS_PER_BLOCK: usize = VOXELS_PER_SIDE * VOXELS_PER_SIDE * VOXELS_PER_SIDE;

/// Number of elements in a feature voxel's feature array.
pub const FEATURE_ARRAY_NUM_ELEMENTS: usize = 32;

/// Distance returned for ESDF queries into unobserved or unallocated space.
/// Preserved bit-for-bit from the original engine.
pub const ESDF_UNKNOWN_DISTANCE: f32 = 1000.0;

/// Log-odds corresponding to occupancy probability exactly zero. Identity
/// of the multi-submap occupancy max-reduction.
pub const LOG_ODDS_PROBABILITY_ZERO: f32 = f32::NEG_INFINITY;

/// Below this absolute distance the ESDF gradient is reported as the zero
/// vector to guard the `-voxel_size / distance` scale against blow-up.
pub const MIN_GRADIENT_DISTANCE: f32 = 1e-4;

/// Number of feature elements per voxel (queryable constant, mirrors the
/// original `Constants` surface).
pub fn feature_array_num_elements() -> usize {
    FEATURE_ARRAY_NUM_ELEMENTS
}

/// Size in bytes of one feature element (features are stored half
/// precision).
pub fn feature_array_element_size() -> usize {
    std::mem::size_of::<f16>()
}

/// The ESDF unknown-distance sentinel.
pub fn esdf_unknown_distance() -> f32 {
    ESDF_UNKNOWN_DISTANCE
}

/// A truncated signed distance voxel. `weight == 0` means the voxel was
/// never updated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TsdfVoxel {
    /// Signed distance to the nearest surface in meters (unbounded).
    pub distance: f32,
    /// Accumulated integration weight, >= 0.
    pub weight: f32,
}

/// A Euclidean signed distance voxel.
///
/// Distances are stored squared, in voxel units. `observed == false` means
/// the stored value must be treated as unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EsdfVoxel {
    /// Squared distance to the nearest surface, in voxel units.
    pub squared_distance_vox: f32,
    /// True if the voxel is inside a surface (distance sign is negative).
    pub is_inside: bool,
    /// False means the voxel has never been observed.
    pub observed: bool,
    /// Integer direction towards the parent (nearest-surface) voxel, used
    /// to reconstruct a gradient.
    pub parent_direction: [i32; 3],
}

/// An occupancy voxel storing a single log-odds scalar. Higher means more
/// likely occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OccupancyVoxel {
    pub log_odds: f32,
}

/// A feature voxel: a fixed-length half-precision feature array plus an
/// accumulation weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVoxel {
    pub features: [f16; FEATURE_ARRAY_NUM_ELEMENTS],
    pub weight: f32,
}

impl Default for FeatureVoxel {
    fn default() -> Self {
        Self {
            features: [f16::ZERO; FEATURE_ARRAY_NUM_ELEMENTS],
            weight: 0.0,
        }
    }
}

/// A fixed-size cube of voxels, stored contiguously.
///
/// Linear layout is `(z * N + y) * N + x` with `N = VOXELS_PER_SIDE`.
#[derive(Debug, Clone)]
pub struct VoxelBlock<V> {
    voxels: Vec<V>,
}

impl<V: Copy + Default> VoxelBlock<V> {
    pub fn new() -> Self {
        Self {
            voxels: vec![V::default(); VOXELS_PER_BLOCK],
        }
    }

    /// Linear index of a local voxel coordinate. Components must be in
    /// `[0, VOXELS_PER_SIDE)`.
    #[inline]
    pub fn linear_index(local: [usize; 3]) -> usize {
        debug_assert!(local.iter().all(|&c| c < VOXELS_PER_SIDE));
        (local[2] * VOXELS_PER_SIDE + local[1]) * VOXELS_PER_SIDE + local[0]
    }

    #[inline]
    pub fn voxel(&self, local: [usize; 3]) -> &V {
        &self.voxels[Self::linear_index(local)]
    }

    #[inline]
    pub fn voxel_mut(&mut self, local: [usize; 3]) -> &mut V {
        &mut self.voxels[Self::linear_index(local)]
    }

    /// All voxels in linear layout order.
    pub fn voxels(&self) -> &[V] {
        &self.voxels
    }
}

impl<V: Copy + Default> Default for VoxelBlock<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_index_layout() {
        assert_eq!(VoxelBlock::<TsdfVoxel>::linear_index([0, 0, 0]), 0);
        assert_eq!(VoxelBlock::<TsdfVoxel>::linear_index([1, 0, 0]), 1);
        assert_eq!(VoxelBlock::<TsdfVoxel>::linear_index([0, 1, 0]), 8);
        assert_eq!(VoxelBlock::<TsdfVoxel>::linear_index([0, 0, 1]), 64);
        assert_eq!(
            VoxelBlock::<TsdfVoxel>::linear_index([7, 7, 7]),
            VOXELS_PER_BLOCK - 1
        );
    }

    #[test]
    fn test_block_voxel_roundtrip() {
        let mut block = VoxelBlock::<TsdfVoxel>::new();
        block.voxel_mut([3, 1, 4]).distance = 0.25;
        block.voxel_mut([3, 1, 4]).weight = 2.0;

        assert_eq!(block.voxel([3, 1, 4]).distance, 0.25);
        assert_eq!(block.voxel([3, 1, 4]).weight, 2.0);
        // Neighbors untouched.
        assert_eq!(block.voxel([4, 1, 4]).weight, 0.0);
    }

    #[test]
    fn test_default_voxels_are_unobserved() {
        let esdf = EsdfVoxel::default();
        assert!(!esdf.observed);

        let tsdf = TsdfVoxel::default();
        assert_eq!(tsdf.weight, 0.0);

        let feature = FeatureVoxel::default();
        assert_eq!(feature.weight, 0.0);
        assert!(feature.features.iter().all(|f| f.to_f32() == 0.0));
    }

    #[test]
    fn test_constants_surface() {
        assert_eq!(feature_array_num_elements(), 32);
        assert_eq!(feature_array_element_size(), 2);
        assert_eq!(esdf_unknown_distance(), 1000.0);
        assert!(LOG_ODDS_PROBABILITY_ZERO.is_infinite());
        assert!(LOG_ODDS_PROBABILITY_ZERO < 0.0);
    }
}
