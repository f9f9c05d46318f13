//! Host-side staging of submap layers into flat arrays.
//!
//! The GPU kernels cannot chase per-submap pointers, so before a launch the
//! selected submaps' hash tables and block pools are concatenated into
//! contiguous arrays with per-submap offset tables. A kernel thread finds
//! submap `s`'s slots in `keys[3 * table_offsets[s] ..]` and its voxels in
//! `payload[stride * (pool_offsets[s] + block_slot * 512 + linear) ..]`.
//!
//! Staging is rebuilt per call. Snapshotting at call time is what pins the
//! data a batch reads; the borrow of the submap set does the rest.

use crate::hash_table::BlockHashTable;
use crate::submap::Submap;
use crate::voxel::{
    EsdfVoxel, FeatureVoxel, OccupancyVoxel, TsdfVoxel, FEATURE_ARRAY_NUM_ELEMENTS,
    VOXELS_PER_BLOCK,
};

/// Payload floats per TSDF voxel (`[distance, weight]`).
pub const TSDF_STRIDE: usize = 2;
/// Payload floats per ESDF voxel
/// (`[squared_distance_vox, is_inside, observed, parent_x, parent_y, parent_z]`).
pub const ESDF_STRIDE: usize = 6;
/// Payload floats per occupancy voxel (`[log_odds]`).
pub const OCCUPANCY_STRIDE: usize = 1;
/// Payload floats per feature voxel (`[f0 .. f31, weight]`).
pub const FEATURE_STRIDE: usize = FEATURE_ARRAY_NUM_ELEMENTS + 1;

/// One voxel layer of a submap set, flattened for upload.
#[derive(Debug, Clone)]
pub struct StagedLayer {
    /// Slot offset of each submap's hash table, length `num_submaps + 1`.
    /// `table_offsets[s + 1] - table_offsets[s]` is submap `s`'s capacity.
    pub table_offsets: Vec<u32>,
    /// Voxel offset of each submap's block pool, length `num_submaps + 1`.
    pub pool_offsets: Vec<u32>,
    /// Concatenated slot keys, three `i32` per slot. Empty slots carry the
    /// same `i32::MAX` sentinel the host tables use.
    pub keys: Vec<i32>,
    /// Concatenated per-slot block-pool indices, local to each submap.
    pub block_slots: Vec<u32>,
    /// Per-submap voxel size.
    pub voxel_sizes: Vec<f32>,
    /// Concatenated voxel payload, `payload_stride` floats per voxel in
    /// block-pool order.
    pub payload: Vec<f32>,
    pub payload_stride: usize,
}

impl StagedLayer {
    pub fn num_submaps(&self) -> usize {
        self.voxel_sizes.len()
    }

    pub fn num_slots(&self) -> usize {
        self.block_slots.len()
    }

    pub fn num_voxels(&self) -> usize {
        self.payload.len() / self.payload_stride.max(1)
    }
}

fn stage_layer<V, L, E>(submaps: &[&Submap], layer: L, stride: usize, encode: E) -> StagedLayer
where
    V: Copy + Default,
    L: Fn(&Submap) -> &BlockHashTable<V>,
    E: Fn(&V, &mut Vec<f32>),
{
    let mut table_offsets = Vec::with_capacity(submaps.len() + 1);
    let mut pool_offsets = Vec::with_capacity(submaps.len() + 1);
    let mut keys = Vec::new();
    let mut block_slots = Vec::new();
    let mut voxel_sizes = Vec::with_capacity(submaps.len());
    let mut payload = Vec::new();

    let mut slot_cursor = 0u32;
    let mut voxel_cursor = 0u32;
    table_offsets.push(slot_cursor);
    pool_offsets.push(voxel_cursor);

    for submap in submaps {
        let table = layer(submap);
        voxel_sizes.push(submap.voxel_size());

        for key in table.slot_keys() {
            keys.extend_from_slice(key);
        }
        block_slots.extend_from_slice(table.slot_values());

        for block in table.block_pool() {
            for voxel in block.voxels() {
                encode(voxel, &mut payload);
            }
        }

        slot_cursor += table.capacity() as u32;
        voxel_cursor += (table.len() * VOXELS_PER_BLOCK) as u32;
        table_offsets.push(slot_cursor);
        pool_offsets.push(voxel_cursor);
    }

    debug_assert_eq!(payload.len(), voxel_cursor as usize * stride);

    StagedLayer {
        table_offsets,
        pool_offsets,
        keys,
        block_slots,
        voxel_sizes,
        payload,
        payload_stride: stride,
    }
}

pub fn stage_tsdf(submaps: &[&Submap]) -> StagedLayer {
    stage_layer(
        submaps,
        |s| &s.tsdf,
        TSDF_STRIDE,
        |v: &TsdfVoxel, out| {
            out.push(v.distance);
            out.push(v.weight);
        },
    )
}

pub fn stage_esdf(submaps: &[&Submap]) -> StagedLayer {
    stage_layer(
        submaps,
        |s| &s.esdf,
        ESDF_STRIDE,
        |v: &EsdfVoxel, out| {
            out.push(v.squared_distance_vox);
            out.push(if v.is_inside { 1.0 } else { 0.0 });
            out.push(if v.observed { 1.0 } else { 0.0 });
            out.push(v.parent_direction[0] as f32);
            out.push(v.parent_direction[1] as f32);
            out.push(v.parent_direction[2] as f32);
        },
    )
}

pub fn stage_occupancy(submaps: &[&Submap]) -> StagedLayer {
    stage_layer(
        submaps,
        |s| &s.occupancy,
        OCCUPANCY_STRIDE,
        |v: &OccupancyVoxel, out| out.push(v.log_odds),
    )
}

pub fn stage_feature(submaps: &[&Submap]) -> StagedLayer {
    stage_layer(
        submaps,
        |s| &s.feature,
        FEATURE_STRIDE,
        |v: &FeatureVoxel, out| {
            for f in &v.features {
                out.push(f.to_f32());
            }
            out.push(v.weight);
        },
    )
}
