//! Per-value-type extraction from a located voxel.
//!
//! These are the pure functions applied once a query thread has resolved a
//! voxel address. The CPU query path calls them directly; the GPU kernels
//! mirror them line for line. The ESDF gradient convention
//! (`-voxel_size / distance` times the integer parent direction, with a
//! zero-vector guard below [`MIN_GRADIENT_DISTANCE`]) is load-bearing and
//! must not drift between the two.

use crate::voxel::{
    EsdfVoxel, FeatureVoxel, OccupancyVoxel, TsdfVoxel, ESDF_UNKNOWN_DISTANCE,
    MIN_GRADIENT_DISTANCE,
};

/// Result of extracting an ESDF voxel for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EsdfSample {
    /// Signed distance in meters, sphere-radius already subtracted.
    /// [`ESDF_UNKNOWN_DISTANCE`] if the voxel is unobserved.
    pub distance: f32,
    /// Gradient pointing away from the surface, present only when
    /// requested and the voxel is observed.
    pub gradient: Option<[f32; 3]>,
}

/// Extract distance (and optionally gradient) from an ESDF voxel.
///
/// `radius` is the query sphere radius; sphere queries ask for the
/// distance from the sphere surface, not its center.
pub fn extract_esdf(
    voxel: &EsdfVoxel,
    voxel_size: f32,
    radius: f32,
    with_gradient: bool,
) -> EsdfSample {
    if !voxel.observed {
        return EsdfSample {
            distance: ESDF_UNKNOWN_DISTANCE,
            gradient: None,
        };
    }

    let mut distance = voxel_size * voxel.squared_distance_vox.sqrt();
    if voxel.is_inside {
        distance = -distance;
    }
    distance -= radius;

    let gradient = if with_gradient {
        if distance.abs() < MIN_GRADIENT_DISTANCE {
            Some([0.0; 3])
        } else {
            let scale = -voxel_size / distance;
            Some([
                scale * voxel.parent_direction[0] as f32,
                scale * voxel.parent_direction[1] as f32,
                scale * voxel.parent_direction[2] as f32,
            ])
        }
    } else {
        None
    };

    EsdfSample { distance, gradient }
}

/// TSDF extraction: stored distance and weight, verbatim.
#[inline]
pub fn extract_tsdf(voxel: &TsdfVoxel) -> [f32; 2] {
    [voxel.distance, voxel.weight]
}

/// Occupancy extraction: stored log-odds, verbatim.
#[inline]
pub fn extract_occupancy(voxel: &OccupancyVoxel) -> f32 {
    voxel.log_odds
}

/// Feature extraction: feature array followed by the weight, packed into
/// the query's output slot. `out` must be `FEATURE_ARRAY_NUM_ELEMENTS + 1`
/// wide.
pub fn extract_feature(voxel: &FeatureVoxel, out: &mut [f32]) {
    debug_assert_eq!(out.len(), voxel.features.len() + 1);
    for (dst, src) in out.iter_mut().zip(voxel.features.iter()) {
        *dst = src.to_f32();
    }
    out[voxel.features.len()] = voxel.weight;
}
