//! CubeCL query kernels, one per voxel layer.
//!
//! One thread per query row. Every kernel runs the same skeleton: resolve
//! the point through the staged hash tables, decode the payload the way the
//! CPU extractors do, reduce across submaps in registers, write the full
//! output row. Rows are always written, so output buffers can be allocated
//! uninitialized.
//!
//! Loops use explicit done-flags instead of `break`: CubeCL's optimizer
//! miscompiles early-exit loops in some backends.

use cubecl::prelude::*;

/// In-kernel twin of the host hash-table probe. Returns
/// `(found, voxel_index)` with `voxel_index` valid only when `found == 1`.
///
/// `table_begin`/`capacity` locate one submap's slot range, `pool_begin`
/// its voxel range. Hash primes and the `i32::MAX` empty-slot sentinel
/// must match `hash_table::spatial_block_hash`.
#[cube]
fn resolve_voxel<F: Float>(
    px: F,
    py: F,
    pz: F,
    keys: &Array<i32>,
    block_slots: &Array<u32>,
    table_begin: u32,
    capacity: u32,
    pool_begin: u32,
    voxel_size: F,
) -> (u32, u32) {
    // Division, not reciprocal-multiply: the host resolver divides, and a
    // point on a voxel boundary must land in the same voxel on both paths.
    let gx = i32::cast_from(F::floor(px / voxel_size));
    let gy = i32::cast_from(F::floor(py / voxel_size));
    let gz = i32::cast_from(F::floor(pz / voxel_size));

    // Arithmetic shift gives floor division by 8 for negative indices too.
    let bx = gx >> 3;
    let by = gy >> 3;
    let bz = gz >> 3;
    let lx = u32::cast_from(gx - bx * 8);
    let ly = u32::cast_from(gy - by * 8);
    let lz = u32::cast_from(gz - bz * 8);

    let hash = u32::cast_from(bx) * 73856093u32
        ^ u32::cast_from(by) * 19349669u32
        ^ u32::cast_from(bz) * 83492791u32;

    let mut found = 0u32.runtime();
    let mut voxel_index = 0u32.runtime();
    let mut done = 0u32.runtime();
    for step in 0..capacity {
        if done == 0u32 {
            let slot = table_begin + (hash + step) % capacity;
            let kx = keys[slot * 3];
            if kx == 2147483647i32 {
                done = 1u32;
            } else if kx == bx && keys[slot * 3 + 1] == by && keys[slot * 3 + 2] == bz {
                let linear = (lz * 8 + ly) * 8 + lx;
                voxel_index = pool_begin + block_slots[slot] * 512 + linear;
                found = 1u32;
                done = 1u32;
            }
        }
    }

    (found, voxel_index)
}

/// ESDF query: `queries` is `N x 4` (`[x, y, z, radius]`), `out` is
/// `N x out_cols` with `out_cols` 1 (`[distance]`) or 4
/// (`[gx, gy, gz, distance]`). Payload stride 6, see `stager::ESDF_STRIDE`.
#[cube(launch_unchecked)]
pub fn esdf_query_kernel<F: Float>(
    queries: &Array<F>,
    table_offsets: &Array<u32>,
    pool_offsets: &Array<u32>,
    keys: &Array<i32>,
    block_slots: &Array<u32>,
    voxel_sizes: &Array<F>,
    payload: &Array<F>,
    num_queries: u32,
    num_submaps: u32,
    out_cols: u32,
    out: &mut Array<F>,
) {
    let i = ABSOLUTE_POS;
    if i >= num_queries {
        terminate!();
    }

    let px = queries[i * 4];
    let py = queries[i * 4 + 1];
    let pz = queries[i * 4 + 2];
    let radius = queries[i * 4 + 3];

    let mut best = F::new(1000.0);
    let mut grad_x = F::new(0.0);
    let mut grad_y = F::new(0.0);
    let mut grad_z = F::new(0.0);
    let mut has_gradient = 0u32.runtime();

    for s in 0..num_submaps {
        let voxel_size = voxel_sizes[s];
        let (found, voxel_index) = resolve_voxel::<F>(
            px,
            py,
            pz,
            keys,
            block_slots,
            table_offsets[s],
            table_offsets[s + 1] - table_offsets[s],
            pool_offsets[s],
            voxel_size,
        );

        if found == 1u32 {
            let base = voxel_index * 6;
            let observed = payload[base + 2];
            if observed > F::new(0.5) {
                let mut distance = voxel_size * F::sqrt(payload[base]);
                if payload[base + 1] > F::new(0.5) {
                    distance = F::new(-1.0) * distance;
                }
                distance = distance - radius;

                // Strict improvement only, so ties keep the earlier
                // submap's gradient.
                if distance < best {
                    best = distance;
                    let mut scale = F::new(0.0);
                    if F::abs(distance) >= F::new(1e-4) {
                        scale = (F::new(-1.0) * voxel_size) / distance;
                    }
                    grad_x = scale * payload[base + 3];
                    grad_y = scale * payload[base + 4];
                    grad_z = scale * payload[base + 5];
                    has_gradient = 1u32;
                }
            }
        }
    }

    if out_cols == 4 {
        out[i * 4 + 3] = best;
        if has_gradient == 1u32 {
            out[i * 4] = grad_x;
            out[i * 4 + 1] = grad_y;
            out[i * 4 + 2] = grad_z;
        } else {
            // Miss rows carry the unknown sentinel in every column.
            out[i * 4] = F::new(1000.0);
            out[i * 4 + 1] = F::new(1000.0);
            out[i * 4 + 2] = F::new(1000.0);
        }
    } else {
        out[i] = best;
    }
}

/// TSDF query: `queries` is `N x 3`, `out` is `N x 2`
/// (`[distance, weight]`, zeros on miss). Payload stride 2.
#[cube(launch_unchecked)]
pub fn tsdf_query_kernel<F: Float>(
    queries: &Array<F>,
    table_offsets: &Array<u32>,
    pool_offsets: &Array<u32>,
    keys: &Array<i32>,
    block_slots: &Array<u32>,
    voxel_sizes: &Array<F>,
    payload: &Array<F>,
    num_queries: u32,
    num_submaps: u32,
    out: &mut Array<F>,
) {
    let i = ABSOLUTE_POS;
    if i >= num_queries {
        terminate!();
    }

    let px = queries[i * 3];
    let py = queries[i * 3 + 1];
    let pz = queries[i * 3 + 2];

    let mut hit = 0u32.runtime();
    let mut best_distance = F::new(0.0);
    let mut best_weight = F::new(0.0);

    for s in 0..num_submaps {
        let (found, voxel_index) = resolve_voxel::<F>(
            px,
            py,
            pz,
            keys,
            block_slots,
            table_offsets[s],
            table_offsets[s + 1] - table_offsets[s],
            pool_offsets[s],
            voxel_sizes[s],
        );

        if found == 1u32 {
            let distance = payload[voxel_index * 2];
            if hit == 0u32 || distance < best_distance {
                best_distance = distance;
                best_weight = payload[voxel_index * 2 + 1];
                hit = 1u32;
            }
        }
    }

    out[i * 2] = best_distance;
    out[i * 2 + 1] = best_weight;
}

/// Occupancy query: `queries` is `N x 3`, `out` is `N x 1`
/// (`[log_odds]`, max across submaps, zero on miss). Payload stride 1.
#[cube(launch_unchecked)]
pub fn occupancy_query_kernel<F: Float>(
    queries: &Array<F>,
    table_offsets: &Array<u32>,
    pool_offsets: &Array<u32>,
    keys: &Array<i32>,
    block_slots: &Array<u32>,
    voxel_sizes: &Array<F>,
    payload: &Array<F>,
    num_queries: u32,
    num_submaps: u32,
    out: &mut Array<F>,
) {
    let i = ABSOLUTE_POS;
    if i >= num_queries {
        terminate!();
    }

    let px = queries[i * 3];
    let py = queries[i * 3 + 1];
    let pz = queries[i * 3 + 2];

    // The max-reduction identity is negative infinity; a hit flag stands
    // in for it so the generated code carries no infinity literal.
    let mut hit = 0u32.runtime();
    let mut best = F::new(0.0);

    for s in 0..num_submaps {
        let (found, voxel_index) = resolve_voxel::<F>(
            px,
            py,
            pz,
            keys,
            block_slots,
            table_offsets[s],
            table_offsets[s + 1] - table_offsets[s],
            pool_offsets[s],
            voxel_sizes[s],
        );

        if found == 1u32 {
            let log_odds = payload[voxel_index];
            if hit == 0u32 || log_odds > best {
                best = log_odds;
            }
            hit = 1u32;
        }
    }

    if hit == 1u32 {
        out[i] = best;
    } else {
        out[i] = F::new(0.0);
    }
}

/// Feature query: `queries` is `N x 3`, `out` is `N x 33`
/// (`[f0 .. f31, weight]`, zeros on miss). Payload stride 33. The first
/// submap with an allocated voxel wins; in practice the staged set holds
/// exactly one submap.
#[cube(launch_unchecked)]
pub fn feature_query_kernel<F: Float>(
    queries: &Array<F>,
    table_offsets: &Array<u32>,
    pool_offsets: &Array<u32>,
    keys: &Array<i32>,
    block_slots: &Array<u32>,
    voxel_sizes: &Array<F>,
    payload: &Array<F>,
    num_queries: u32,
    num_submaps: u32,
    out: &mut Array<F>,
) {
    let i = ABSOLUTE_POS;
    if i >= num_queries {
        terminate!();
    }

    let px = queries[i * 3];
    let py = queries[i * 3 + 1];
    let pz = queries[i * 3 + 2];

    for c in 0..33u32 {
        out[i * 33 + c] = F::new(0.0);
    }

    let mut done = 0u32.runtime();
    for s in 0..num_submaps {
        if done == 0u32 {
            let (found, voxel_index) = resolve_voxel::<F>(
                px,
                py,
                pz,
                keys,
                block_slots,
                table_offsets[s],
                table_offsets[s + 1] - table_offsets[s],
                pool_offsets[s],
                voxel_sizes[s],
            );

            if found == 1u32 {
                for c in 0..33u32 {
                    out[i * 33 + c] = payload[voxel_index * 33 + c];
                }
                done = 1u32;
            }
        }
    }
}
