//! Submaps and the queryable submap set.
//!
//! A submap is one independently maintained volumetric map: one block hash
//! table per voxel layer plus its voxel/block size metadata. Submaps are
//! created and mutated by the external Map Builder; the query engine only
//! borrows a read view for the duration of a call.

use crate::hash_table::BlockHashTable;
use crate::indexing::block_and_voxel_index;
use crate::voxel::{
    EsdfVoxel, FeatureVoxel, OccupancyVoxel, TsdfVoxel, VOXELS_PER_SIDE,
};

/// The voxel layers a submap carries. A layer holds exactly one voxel
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelLayerType {
    Tsdf,
    Esdf,
    Occupancy,
    Feature,
}

/// One independently built volumetric map.
#[derive(Debug, Clone)]
pub struct Submap {
    voxel_size: f32,
    block_size: f32,
    pub(crate) tsdf: BlockHashTable<TsdfVoxel>,
    pub(crate) esdf: BlockHashTable<EsdfVoxel>,
    pub(crate) occupancy: BlockHashTable<OccupancyVoxel>,
    pub(crate) feature: BlockHashTable<FeatureVoxel>,
}

impl Submap {
    /// Create an empty submap. The block size is derived from the voxel
    /// size; the agreement between the two is an invariant every query
    /// relies on.
    pub fn new(voxel_size: f32) -> Self {
        assert!(
            voxel_size > 0.0 && voxel_size.is_finite(),
            "voxel size must be positive and finite"
        );
        Self {
            voxel_size,
            block_size: voxel_size * VOXELS_PER_SIDE as f32,
            tsdf: BlockHashTable::new(),
            esdf: BlockHashTable::new(),
            occupancy: BlockHashTable::new(),
            feature: BlockHashTable::new(),
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn block_size(&self) -> f32 {
        self.block_size
    }

    /// Number of allocated blocks in a layer.
    pub fn num_blocks(&self, layer: VoxelLayerType) -> usize {
        match layer {
            VoxelLayerType::Tsdf => self.tsdf.len(),
            VoxelLayerType::Esdf => self.esdf.len(),
            VoxelLayerType::Occupancy => self.occupancy.len(),
            VoxelLayerType::Feature => self.feature.len(),
        }
    }

    // Map Builder write path. Allocates the containing block on demand.

    pub fn set_tsdf_voxel(&mut self, position: [f32; 3], voxel: TsdfVoxel) {
        let (block, local) = block_and_voxel_index(position, self.voxel_size);
        *self.tsdf.insert_or_get(block).voxel_mut(local) = voxel;
    }

    pub fn set_esdf_voxel(&mut self, position: [f32; 3], voxel: EsdfVoxel) {
        let (block, local) = block_and_voxel_index(position, self.voxel_size);
        *self.esdf.insert_or_get(block).voxel_mut(local) = voxel;
    }

    pub fn set_occupancy_voxel(&mut self, position: [f32; 3], voxel: OccupancyVoxel) {
        let (block, local) = block_and_voxel_index(position, self.voxel_size);
        *self.occupancy.insert_or_get(block).voxel_mut(local) = voxel;
    }

    pub fn set_feature_voxel(&mut self, position: [f32; 3], voxel: FeatureVoxel) {
        let (block, local) = block_and_voxel_index(position, self.voxel_size);
        *self.feature.insert_or_get(block).voxel_mut(local) = voxel;
    }

    // Read path (address resolution per layer). A miss means the
    // containing block was never allocated.

    pub fn tsdf_voxel(&self, position: [f32; 3]) -> Option<&TsdfVoxel> {
        self.tsdf.voxel_at_position(position, self.voxel_size)
    }

    pub fn esdf_voxel(&self, position: [f32; 3]) -> Option<&EsdfVoxel> {
        self.esdf.voxel_at_position(position, self.voxel_size)
    }

    pub fn occupancy_voxel(&self, position: [f32; 3]) -> Option<&OccupancyVoxel> {
        self.occupancy.voxel_at_position(position, self.voxel_size)
    }

    pub fn feature_voxel(&self, position: [f32; 3]) -> Option<&FeatureVoxel> {
        self.feature.voxel_at_position(position, self.voxel_size)
    }
}

/// An ordered collection of independent submaps.
///
/// Iteration order is creation order; the multi-submap reducers' documented
/// tie-break ("first submap wins") refers to this order.
#[derive(Debug, Clone, Default)]
pub struct SubmapSet {
    submaps: Vec<Submap>,
}

impl SubmapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, submap: Submap) -> usize {
        self.submaps.push(submap);
        self.submaps.len() - 1
    }

    pub fn len(&self) -> usize {
        self.submaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submaps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Submap> {
        self.submaps.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Submap> {
        self.submaps.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Submap> {
        self.submaps.iter()
    }

    /// Per-submap block sizes, the only metadata aggregated across
    /// submaps for multi-submap calls.
    pub fn block_sizes(&self) -> Vec<f32> {
        self.submaps.iter().map(|s| s.block_size()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_size_derived_from_voxel_size() {
        let submap = Submap::new(0.1);
        assert_relative_eq!(submap.block_size(), 0.8);

        let submap = Submap::new(0.05);
        assert_relative_eq!(submap.block_size(), 0.4);
    }

    #[test]
    #[should_panic(expected = "voxel size must be positive")]
    fn test_invalid_voxel_size_rejected() {
        let _ = Submap::new(0.0);
    }

    #[test]
    fn test_layers_are_independent() {
        let mut submap = Submap::new(0.1);
        let p = [0.25, 0.25, 0.25];

        submap.set_tsdf_voxel(
            p,
            TsdfVoxel {
                distance: 0.3,
                weight: 1.0,
            },
        );

        assert!(submap.tsdf_voxel(p).is_some());
        // Writing the TSDF layer does not allocate the others.
        assert!(submap.esdf_voxel(p).is_none());
        assert!(submap.occupancy_voxel(p).is_none());
        assert!(submap.feature_voxel(p).is_none());
        assert_eq!(submap.num_blocks(VoxelLayerType::Tsdf), 1);
        assert_eq!(submap.num_blocks(VoxelLayerType::Esdf), 0);
    }

    #[test]
    fn test_voxel_write_read_roundtrip() {
        let mut submap = Submap::new(0.1);
        let p = [-0.33, 0.52, 1.17];

        submap.set_esdf_voxel(
            p,
            EsdfVoxel {
                squared_distance_vox: 25.0,
                is_inside: true,
                observed: true,
                parent_direction: [1, 0, -2],
            },
        );

        let voxel = submap.esdf_voxel(p).expect("voxel should resolve");
        assert_eq!(voxel.squared_distance_vox, 25.0);
        assert!(voxel.is_inside);
        assert_eq!(voxel.parent_direction, [1, 0, -2]);
    }

    #[test]
    fn test_submap_set_metadata() {
        let mut set = SubmapSet::new();
        set.push(Submap::new(0.1));
        set.push(Submap::new(0.05));

        assert_eq!(set.len(), 2);
        let sizes = set.block_sizes();
        assert_relative_eq!(sizes[0], 0.8);
        assert_relative_eq!(sizes[1], 0.4);
    }
}
