//! CPU reference implementation of the query pipeline.
//!
//! One rayon task per query row, resolve -> extract -> reduce, identical
//! semantics to the GPU kernels. This is the correctness baseline for
//! kernel comparison tests and the execution path when the engine runs
//! without a GPU.

use rayon::prelude::*;

use crate::query::extract::{extract_esdf, extract_feature, extract_occupancy, extract_tsdf};
use crate::submap::Submap;
use crate::voxel::{
    ESDF_UNKNOWN_DISTANCE, FEATURE_ARRAY_NUM_ELEMENTS, LOG_ODDS_PROBABILITY_ZERO,
};

/// ESDF query over the given submaps. Output is row-major
/// `N x 1` (`[distance]`) or `N x 4` (`[gx, gy, gz, distance]`) depending
/// on `with_gradient`, pre-filled with [`ESDF_UNKNOWN_DISTANCE`].
///
/// Reduction across submaps is a running minimum with a strict `<`
/// comparison: the first submap in iteration order wins exact ties, and a
/// non-improving submap never overwrites the established gradient.
pub fn query_esdf_cpu(submaps: &[&Submap], queries: &[[f32; 4]], with_gradient: bool) -> Vec<f32> {
    let cols = if with_gradient { 4 } else { 1 };
    let mut out = vec![ESDF_UNKNOWN_DISTANCE; queries.len() * cols];

    out.par_chunks_mut(cols)
        .zip(queries.par_iter())
        .for_each(|(row, query)| {
            let position = [query[0], query[1], query[2]];
            let radius = query[3];

            let mut best = ESDF_UNKNOWN_DISTANCE;
            let mut best_gradient = None;

            for submap in submaps {
                if let Some(voxel) = submap.esdf_voxel(position) {
                    let sample = extract_esdf(voxel, submap.voxel_size(), radius, with_gradient);
                    if sample.distance < best {
                        best = sample.distance;
                        best_gradient = sample.gradient;
                    }
                }
            }

            if with_gradient {
                row[3] = best;
                if let Some(gradient) = best_gradient {
                    row[..3].copy_from_slice(&gradient);
                }
            } else {
                row[0] = best;
            }
        });

    out
}

/// TSDF query. Output is row-major `N x 2` (`[distance, weight]`),
/// zero-filled; rows where every submap missed keep their initial value.
/// Multi-submap reduction keeps the pair from the submap with the minimum
/// stored distance (strict `<`, first submap wins ties).
pub fn query_tsdf_cpu(submaps: &[&Submap], queries: &[[f32; 3]]) -> Vec<f32> {
    let mut out = vec![0.0f32; queries.len() * 2];

    out.par_chunks_mut(2)
        .zip(queries.par_iter())
        .for_each(|(row, &position)| {
            let mut hit = false;
            let mut best = [0.0f32; 2];

            for submap in submaps {
                if let Some(voxel) = submap.tsdf_voxel(position) {
                    let sample = extract_tsdf(voxel);
                    if !hit || sample[0] < best[0] {
                        best = sample;
                        hit = true;
                    }
                }
            }

            if hit {
                row.copy_from_slice(&best);
            }
        });

    out
}

/// Multi-submap occupancy query. Output is row-major `N x 1`
/// (`[log_odds]`), zero-filled; the reduction is a running maximum
/// initialized to [`LOG_ODDS_PROBABILITY_ZERO`], written only when at
/// least one submap had an allocated voxel at the point.
pub fn query_occupancy_cpu(submaps: &[&Submap], queries: &[[f32; 3]]) -> Vec<f32> {
    let mut out = vec![0.0f32; queries.len()];

    out.par_iter_mut()
        .zip(queries.par_iter())
        .for_each(|(slot, &position)| {
            let mut best = LOG_ODDS_PROBABILITY_ZERO;
            let mut hit = false;

            for submap in submaps {
                if let Some(voxel) = submap.occupancy_voxel(position) {
                    hit = true;
                    let log_odds = extract_occupancy(voxel);
                    if log_odds > best {
                        best = log_odds;
                    }
                }
            }

            if hit {
                *slot = best;
            }
        });

    out
}

/// Single-submap feature query. Output is row-major
/// `N x (FEATURE_ARRAY_NUM_ELEMENTS + 1)` (`[f0.., weight]`), zero-filled;
/// missed rows keep their initial value.
pub fn query_feature_cpu(submap: &Submap, queries: &[[f32; 3]]) -> Vec<f32> {
    let cols = FEATURE_ARRAY_NUM_ELEMENTS + 1;
    let mut out = vec![0.0f32; queries.len() * cols];

    out.par_chunks_mut(cols)
        .zip(queries.par_iter())
        .for_each(|(row, &position)| {
            if let Some(voxel) = submap.feature_voxel(position) {
                extract_feature(voxel, row);
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submap::Submap;
    use crate::voxel::{EsdfVoxel, OccupancyVoxel, TsdfVoxel};
    use approx::assert_relative_eq;

    fn esdf_submap_with(
        voxel_size: f32,
        position: [f32; 3],
        squared_distance_vox: f32,
        is_inside: bool,
        parent: [i32; 3],
    ) -> Submap {
        let mut submap = Submap::new(voxel_size);
        submap.set_esdf_voxel(
            position,
            EsdfVoxel {
                squared_distance_vox,
                is_inside,
                observed: true,
                parent_direction: parent,
            },
        );
        submap
    }

    #[test]
    fn test_esdf_miss_returns_unknown_sentinel() {
        let submap = Submap::new(0.1);
        let out = query_esdf_cpu(&[&submap], &[[5.0, 5.0, 5.0, 0.0]], false);
        assert_eq!(out, vec![ESDF_UNKNOWN_DISTANCE]);
    }

    #[test]
    fn test_esdf_end_to_end_scenario() {
        // Voxel size 0.1, squared distance 100 vox => 1.0 m, observed,
        // outside. Query at the voxel with radius 0 then 0.4.
        let submap = esdf_submap_with(0.1, [0.05, 0.05, 0.05], 100.0, false, [1, 0, 0]);

        let out = query_esdf_cpu(&[&submap], &[[0.05, 0.05, 0.05, 0.0]], false);
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-5);

        let out = query_esdf_cpu(&[&submap], &[[0.05, 0.05, 0.05, 0.4]], false);
        assert_relative_eq!(out[0], 0.6, epsilon = 1e-5);
    }

    #[test]
    fn test_esdf_sphere_radius_monotonicity() {
        let submap = esdf_submap_with(0.1, [0.05, 0.05, 0.05], 64.0, false, [0, 1, 0]);
        let p = [0.05, 0.05, 0.05];

        let d1 = query_esdf_cpu(&[&submap], &[[p[0], p[1], p[2], 0.1]], false)[0];
        let d2 = query_esdf_cpu(&[&submap], &[[p[0], p[1], p[2], 0.3]], false)[0];
        assert_relative_eq!(d2, d1 - 0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_esdf_multi_submap_minimum_with_gradient_ownership() {
        // Submap A: 0.5 m outside; submap B: 0.2 m inside (=> -0.2).
        let p = [0.05, 0.05, 0.05];
        let a = esdf_submap_with(0.1, p, 25.0, false, [1, 0, 0]);
        let b = esdf_submap_with(0.1, p, 4.0, true, [0, 0, 1]);

        let out = query_esdf_cpu(&[&a, &b], &[[p[0], p[1], p[2], 0.0]], true);
        assert_relative_eq!(out[3], -0.2, epsilon = 1e-5);

        // Gradient must come from submap B only: scale = -0.1 / -0.2 = 0.5,
        // parent (0, 0, 1) => (0, 0, 0.5).
        assert_relative_eq!(out[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(out[1], 0.0, epsilon = 1e-5);
        assert_relative_eq!(out[2], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_esdf_multi_matches_min_of_singles() {
        let p = [0.05, 0.05, 0.05];
        let a = esdf_submap_with(0.1, p, 25.0, false, [1, 0, 0]);
        let b = esdf_submap_with(0.05, p, 36.0, false, [0, 1, 0]);
        let c = Submap::new(0.1); // empty, contributes nothing

        let query = [[p[0], p[1], p[2], 0.0]];
        let da = query_esdf_cpu(&[&a], &query, false)[0];
        let db = query_esdf_cpu(&[&b], &query, false)[0];
        let multi = query_esdf_cpu(&[&a, &b, &c], &query, false)[0];

        assert_relative_eq!(multi, da.min(db), epsilon = 1e-6);
    }

    #[test]
    fn test_esdf_tie_break_first_submap_wins() {
        // Incidental behavior, documented rather than contractual: equal
        // distances resolve to the first submap in iteration order.
        let p = [0.05, 0.05, 0.05];
        let a = esdf_submap_with(0.1, p, 100.0, false, [1, 0, 0]);
        let b = esdf_submap_with(0.1, p, 100.0, false, [0, 1, 0]);

        let out = query_esdf_cpu(&[&a, &b], &[[p[0], p[1], p[2], 0.0]], true);
        assert_relative_eq!(out[3], 1.0, epsilon = 1e-5);
        // Gradient from submap A's parent direction (x axis).
        assert_relative_eq!(out[0], -0.1, epsilon = 1e-5);
        assert_relative_eq!(out[1], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_esdf_unobserved_voxel_does_not_beat_observed() {
        let p = [0.05, 0.05, 0.05];
        let mut unobserved = Submap::new(0.1);
        unobserved.set_esdf_voxel(
            p,
            EsdfVoxel {
                squared_distance_vox: 1.0,
                observed: false,
                ..Default::default()
            },
        );
        let observed = esdf_submap_with(0.1, p, 25.0, false, [1, 0, 0]);

        let out = query_esdf_cpu(&[&unobserved, &observed], &[[p[0], p[1], p[2], 0.0]], false);
        assert_relative_eq!(out[0], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_tsdf_single_and_multi() {
        let p = [0.15, 0.15, 0.15];
        let mut a = Submap::new(0.1);
        a.set_tsdf_voxel(
            p,
            TsdfVoxel {
                distance: 0.3,
                weight: 2.0,
            },
        );
        let mut b = Submap::new(0.1);
        b.set_tsdf_voxel(
            p,
            TsdfVoxel {
                distance: -0.1,
                weight: 7.0,
            },
        );

        let single = query_tsdf_cpu(&[&a], &[p]);
        assert_eq!(single, vec![0.3, 2.0]);

        // Multi keeps the pair belonging to the minimum distance.
        let multi = query_tsdf_cpu(&[&a, &b], &[p]);
        assert_eq!(multi, vec![-0.1, 7.0]);
    }

    #[test]
    fn test_tsdf_miss_leaves_output_initial() {
        let a = Submap::new(0.1);
        let out = query_tsdf_cpu(&[&a], &[[1.0, 1.0, 1.0]]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_occupancy_maximum_reduction() {
        let p = [0.25, 0.25, 0.25];
        let mut a = Submap::new(0.1);
        a.set_occupancy_voxel(p, OccupancyVoxel { log_odds: -2.0 });
        let mut b = Submap::new(0.1);
        b.set_occupancy_voxel(p, OccupancyVoxel { log_odds: 3.5 });

        // Occupied in any one submap wins over free readings in others.
        let out = query_occupancy_cpu(&[&a, &b], &[p]);
        assert_eq!(out, vec![3.5]);

        let out = query_occupancy_cpu(&[&b, &a], &[p]);
        assert_eq!(out, vec![3.5]);
    }

    #[test]
    fn test_occupancy_miss_leaves_zero() {
        let a = Submap::new(0.1);
        let out = query_occupancy_cpu(&[&a], &[[0.0, 0.0, 0.0]]);
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_occupancy_negative_log_odds_still_reported_on_hit() {
        // A hit with a free-space reading must be distinguishable from a
        // miss only via the caller's initial value, so a lone negative
        // log-odds is written as-is.
        let p = [0.25, 0.25, 0.25];
        let mut a = Submap::new(0.1);
        a.set_occupancy_voxel(p, OccupancyVoxel { log_odds: -4.0 });

        let out = query_occupancy_cpu(&[&a], &[p]);
        assert_eq!(out, vec![-4.0]);
    }

    #[test]
    fn test_feature_query_roundtrip() {
        use crate::voxel::FeatureVoxel;
        use half::f16;

        let p = [0.35, 0.35, 0.35];
        let mut submap = Submap::new(0.1);
        let mut voxel = FeatureVoxel {
            weight: 4.0,
            ..Default::default()
        };
        voxel.features[2] = f16::from_f32(1.5);
        submap.set_feature_voxel(p, voxel);

        let out = query_feature_cpu(&submap, &[p, [9.0, 9.0, 9.0]]);
        let cols = FEATURE_ARRAY_NUM_ELEMENTS + 1;

        assert_eq!(out[2], 1.5);
        assert_eq!(out[FEATURE_ARRAY_NUM_ELEMENTS], 4.0);
        // Second row missed: stays zero.
        assert!(out[cols..].iter().all(|&v| v == 0.0));
    }
}
