//! Open-addressed hash table mapping block indices to voxel blocks.
//!
//! One instance exists per (submap, voxel layer) pair. The write path
//! (`insert_or_get`, `clear`) belongs to the external Map Builder; the
//! query engine only ever reads. Concurrent reads are safe by construction:
//! a query call holds a shared borrow of the owning submap set for its full
//! duration, which statically excludes mutation mid-batch.
//!
//! Slots are kept in flat arrays (keys + block-pool indices) with an
//! `i32::MAX` key sentinel for empty slots, so the table view can be staged
//! to the GPU without reshaping. The probe sequence (spatial hash, linear
//! probing) is mirrored in the query kernels; keep the two in sync.

use crate::indexing::{block_and_voxel_index, BlockIndex};
use crate::voxel::VoxelBlock;

/// Key component marking an empty slot. Block indices this large are
/// unreachable from finite world positions.
pub const EMPTY_SLOT_KEY: i32 = i32::MAX;

/// Spatial hash primes, shared with the in-kernel probe.
pub const HASH_PRIME_X: u32 = 73_856_093;
pub const HASH_PRIME_Y: u32 = 19_349_669;
pub const HASH_PRIME_Z: u32 = 83_492_791;

const DEFAULT_CAPACITY: usize = 64;

/// Spatial hash of a block index (large-prime multiply + XOR).
#[inline]
pub fn spatial_block_hash(index: BlockIndex) -> u32 {
    (index.x as u32).wrapping_mul(HASH_PRIME_X)
        ^ (index.y as u32).wrapping_mul(HASH_PRIME_Y)
        ^ (index.z as u32).wrapping_mul(HASH_PRIME_Z)
}

/// Open-addressed map from [`BlockIndex`] to [`VoxelBlock<V>`].
#[derive(Debug, Clone)]
pub struct BlockHashTable<V> {
    /// Slot keys; `[EMPTY_SLOT_KEY, _, _]` marks a vacant slot.
    keys: Vec<[i32; 3]>,
    /// Per-slot index into `blocks`, valid where the slot is occupied.
    block_slots: Vec<u32>,
    /// Block pool. Stable across growth; only the slot arrays rehash.
    blocks: Vec<VoxelBlock<V>>,
}

impl<V: Copy + Default> BlockHashTable<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a table with at least `capacity` slots (rounded up to a
    /// power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            keys: vec![[EMPTY_SLOT_KEY; 3]; capacity],
            block_slots: vec![0; capacity],
            blocks: Vec::new(),
        }
    }

    /// Number of allocated blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of slots (always a power of two, never zero).
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Raw slot keys, for staging.
    pub(crate) fn slot_keys(&self) -> &[[i32; 3]] {
        &self.keys
    }

    /// Raw per-slot block-pool indices, for staging.
    pub(crate) fn slot_values(&self) -> &[u32] {
        &self.block_slots
    }

    /// Block pool in slot-value order, for staging.
    pub(crate) fn block_pool(&self) -> &[VoxelBlock<V>] {
        &self.blocks
    }

    /// Find the slot holding `index`, walking the probe sequence until the
    /// key or an empty slot is met.
    fn probe(&self, index: BlockIndex) -> Option<usize> {
        let capacity = self.capacity();
        let start = spatial_block_hash(index) as usize % capacity;
        let key = [index.x, index.y, index.z];
        for step in 0..capacity {
            let slot = (start + step) % capacity;
            let slot_key = self.keys[slot];
            if slot_key[0] == EMPTY_SLOT_KEY {
                return None;
            }
            if slot_key == key {
                return Some(slot);
            }
        }
        None
    }

    /// Look up the block at `index`. A miss is a normal, frequent outcome.
    pub fn block(&self, index: BlockIndex) -> Option<&VoxelBlock<V>> {
        self.probe(index)
            .map(|slot| &self.blocks[self.block_slots[slot] as usize])
    }

    /// Mutable lookup, Map Builder side.
    pub fn block_mut(&mut self, index: BlockIndex) -> Option<&mut VoxelBlock<V>> {
        let slot = self.probe(index)?;
        let pool = self.block_slots[slot] as usize;
        Some(&mut self.blocks[pool])
    }

    /// Resolve a world position to its voxel, if the containing block is
    /// allocated. This is the host-side address-resolution read path.
    pub fn voxel_at_position(&self, position: [f32; 3], voxel_size: f32) -> Option<&V> {
        let (block_index, local) = block_and_voxel_index(position, voxel_size);
        self.block(block_index).map(|b| b.voxel(local))
    }

    /// Get the block at `index`, allocating a default-initialized one if
    /// absent. Map Builder write path.
    pub fn insert_or_get(&mut self, index: BlockIndex) -> &mut VoxelBlock<V> {
        // Grow before insertion keeps the probe invariant (no full table).
        if (self.blocks.len() + 1) * 4 > self.capacity() * 3 {
            self.grow();
        }

        let capacity = self.capacity();
        let start = spatial_block_hash(index) as usize % capacity;
        let key = [index.x, index.y, index.z];
        let mut target = None;
        for step in 0..capacity {
            let slot = (start + step) % capacity;
            let slot_key = self.keys[slot];
            if slot_key == key || slot_key[0] == EMPTY_SLOT_KEY {
                target = Some((slot, slot_key[0] == EMPTY_SLOT_KEY));
                break;
            }
        }
        let (slot, vacant) = target.expect("hash table never runs full");

        if vacant {
            self.keys[slot] = key;
            self.block_slots[slot] = self.blocks.len() as u32;
            self.blocks.push(VoxelBlock::new());
        }
        let pool = self.block_slots[slot] as usize;
        &mut self.blocks[pool]
    }

    /// Drop all blocks and reset the slot arrays.
    pub fn clear(&mut self) {
        let capacity = self.capacity();
        self.keys = vec![[EMPTY_SLOT_KEY; 3]; capacity];
        self.block_slots = vec![0; capacity];
        self.blocks.clear();
    }

    /// Iterate allocated `(BlockIndex, &VoxelBlock)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (BlockIndex, &VoxelBlock<V>)> {
        self.keys
            .iter()
            .zip(self.block_slots.iter())
            .filter(|(key, _)| key[0] != EMPTY_SLOT_KEY)
            .map(|(key, &slot)| {
                (
                    BlockIndex::new(key[0], key[1], key[2]),
                    &self.blocks[slot as usize],
                )
            })
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let old_keys = std::mem::replace(&mut self.keys, vec![[EMPTY_SLOT_KEY; 3]; new_capacity]);
        let old_slots = std::mem::replace(&mut self.block_slots, vec![0; new_capacity]);

        for (key, pool_slot) in old_keys.into_iter().zip(old_slots) {
            if key[0] == EMPTY_SLOT_KEY {
                continue;
            }
            let index = BlockIndex::new(key[0], key[1], key[2]);
            let start = spatial_block_hash(index) as usize % new_capacity;
            for step in 0..new_capacity {
                let slot = (start + step) % new_capacity;
                if self.keys[slot][0] == EMPTY_SLOT_KEY {
                    self.keys[slot] = key;
                    self.block_slots[slot] = pool_slot;
                    break;
                }
            }
        }
    }
}

impl<V: Copy + Default> Default for BlockHashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
