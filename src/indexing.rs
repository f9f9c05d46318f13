//! World-space to block/voxel address math.
//!
//! A world point resolves to an integer block index (floor division by the
//! block size) and an intra-block voxel coordinate. The same math runs
//! inside the query kernels; keep the two in sync.

use crate::voxel::{VOXELS_PER_SIDE, VOXELS_PER_SIDE_LOG2};

/// Integer 3D index of a voxel block within a submap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIndex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockIndex {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Block index containing a world-space position.
pub fn block_index_from_position(position: [f32; 3], block_size: f32) -> BlockIndex {
    BlockIndex {
        x: (position[0] / block_size).floor() as i32,
        y: (position[1] / block_size).floor() as i32,
        z: (position[2] / block_size).floor() as i32,
    }
}

/// Global (layer-wide) integer voxel index containing a position.
pub fn global_voxel_index(position: [f32; 3], voxel_size: f32) -> [i32; 3] {
    [
        (position[0] / voxel_size).floor() as i32,
        (position[1] / voxel_size).floor() as i32,
        (position[2] / voxel_size).floor() as i32,
    ]
}

/// Resolve a position into its block index and intra-block voxel
/// coordinate.
///
/// The block index is the floor division of the global voxel index by
/// `VOXELS_PER_SIDE`; an arithmetic right shift gives floor semantics for
/// negative indices.
pub fn block_and_voxel_index(position: [f32; 3], voxel_size: f32) -> (BlockIndex, [usize; 3]) {
    let g = global_voxel_index(position, voxel_size);
    let block = BlockIndex {
        x: g[0] >> VOXELS_PER_SIDE_LOG2,
        y: g[1] >> VOXELS_PER_SIDE_LOG2,
        z: g[2] >> VOXELS_PER_SIDE_LOG2,
    };
    let n = VOXELS_PER_SIDE as i32;
    let local = [
        (g[0] - block.x * n) as usize,
        (g[1] - block.y * n) as usize,
        (g[2] - block.z * n) as usize,
    ];
    (block, local)
}

/// World-space center of a voxel identified by block and local indices.
pub fn voxel_center(block: BlockIndex, local: [usize; 3], voxel_size: f32) -> [f32; 3] {
    let n = VOXELS_PER_SIDE as i32;
    [
        (block.x * n + local[0] as i32) as f32 * voxel_size + 0.5 * voxel_size,
        (block.y * n + local[1] as i32) as f32 * voxel_size + 0.5 * voxel_size,
        (block.z * n + local[2] as i32) as f32 * voxel_size + 0.5 * voxel_size,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_index_from_position() {
        let block_size = 0.8; // voxel size 0.1 * 8

        assert_eq!(
            block_index_from_position([0.0, 0.0, 0.0], block_size),
            BlockIndex::new(0, 0, 0)
        );
        assert_eq!(
            block_index_from_position([0.79, 1.6, -0.01], block_size),
            BlockIndex::new(0, 2, -1)
        );
        assert_eq!(
            block_index_from_position([-0.8, -0.81, 2.4], block_size),
            BlockIndex::new(-1, -2, 3)
        );
    }

    #[test]
    fn test_block_and_voxel_index_positive() {
        let voxel_size = 0.1;
        let (block, local) = block_and_voxel_index([0.05, 0.35, 0.75], voxel_size);
        assert_eq!(block, BlockIndex::new(0, 0, 0));
        assert_eq!(local, [0, 3, 7]);

        let (block, local) = block_and_voxel_index([0.85, 0.0, 0.0], voxel_size);
        assert_eq!(block, BlockIndex::new(1, 0, 0));
        assert_eq!(local, [0, 0, 0]);
    }

    #[test]
    fn test_block_and_voxel_index_negative() {
        let voxel_size = 0.1;
        // -0.05 lies in global voxel -1, which is local voxel 7 of block -1.
        let (block, local) = block_and_voxel_index([-0.05, -0.75, -0.85], voxel_size);
        assert_eq!(block, BlockIndex::new(-1, -1, -2));
        assert_eq!(local, [7, 0, 7]);
    }

    #[test]
    fn test_local_indices_in_range() {
        let voxel_size = 0.05;
        for i in -40..40 {
            let p = [i as f32 * 0.037, i as f32 * -0.053, i as f32 * 0.011];
            let (_, local) = block_and_voxel_index(p, voxel_size);
            assert!(local.iter().all(|&c| c < VOXELS_PER_SIDE), "local {local:?} for {p:?}");
        }
    }

    #[test]
    fn test_voxel_center_roundtrip() {
        let voxel_size = 0.1;
        let (block, local) = block_and_voxel_index([0.31, -0.22, 1.44], voxel_size);
        let center = voxel_center(block, local, voxel_size);
        let (block2, local2) = block_and_voxel_index(center, voxel_size);
        assert_eq!(block, block2);
        assert_eq!(local, local2);
    }
}
