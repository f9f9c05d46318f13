//! Scene builders shared by unit and integration tests.

use nalgebra::Vector3;
use rand::Rng;

use crate::indexing::global_voxel_index;
use crate::submap::Submap;
use crate::voxel::{
    EsdfVoxel, FeatureVoxel, OccupancyVoxel, TsdfVoxel, FEATURE_ARRAY_NUM_ELEMENTS,
};
use half::f16;

/// Build a submap whose ESDF layer encodes a sphere of `radius` at
/// `center`. Every voxel with its center inside the cube
/// `center +- extent` is observed; distances are exact sphere distances
/// and parent directions point at the nearest surface point.
pub fn make_sphere_esdf_submap(
    voxel_size: f32,
    center: [f32; 3],
    radius: f32,
    extent: f32,
) -> Submap {
    let mut submap = Submap::new(voxel_size);
    let center = Vector3::from(center);

    let lo = global_voxel_index((center - Vector3::repeat(extent)).into(), voxel_size);
    let hi = global_voxel_index((center + Vector3::repeat(extent)).into(), voxel_size);

    for gz in lo[2]..=hi[2] {
        for gy in lo[1]..=hi[1] {
            for gx in lo[0]..=hi[0] {
                let voxel_center = Vector3::new(
                    (gx as f32 + 0.5) * voxel_size,
                    (gy as f32 + 0.5) * voxel_size,
                    (gz as f32 + 0.5) * voxel_size,
                );
                let offset = voxel_center - center;
                let distance = offset.norm() - radius;

                // Parent is the nearest surface voxel, expressed as an
                // integer step count.
                let parent = if offset.norm() > 1e-6 {
                    let to_surface = -offset.normalize() * distance;
                    [
                        (to_surface.x / voxel_size).round() as i32,
                        (to_surface.y / voxel_size).round() as i32,
                        (to_surface.z / voxel_size).round() as i32,
                    ]
                } else {
                    [0, 0, 0]
                };

                submap.set_esdf_voxel(
                    voxel_center.into(),
                    EsdfVoxel {
                        squared_distance_vox: (distance / voxel_size).powi(2),
                        is_inside: distance < 0.0,
                        observed: true,
                        parent_direction: parent,
                    },
                );
            }
        }
    }

    submap
}

/// Submap with `n` random TSDF voxels scattered in `[-extent, extent]^3`.
pub fn random_tsdf_submap<R: Rng>(rng: &mut R, voxel_size: f32, n: usize, extent: f32) -> Submap {
    let mut submap = Submap::new(voxel_size);
    for _ in 0..n {
        submap.set_tsdf_voxel(
            random_point(rng, extent),
            TsdfVoxel {
                distance: rng.gen_range(-1.0..1.0),
                weight: rng.gen_range(0.0..100.0),
            },
        );
    }
    submap
}

/// Submap with `n` random ESDF voxels, roughly one in eight unobserved.
pub fn random_esdf_submap<R: Rng>(rng: &mut R, voxel_size: f32, n: usize, extent: f32) -> Submap {
    let mut submap = Submap::new(voxel_size);
    for _ in 0..n {
        submap.set_esdf_voxel(
            random_point(rng, extent),
            EsdfVoxel {
                squared_distance_vox: rng.gen_range(0.0..400.0),
                is_inside: rng.gen_bool(0.3),
                observed: !rng.gen_bool(0.125),
                parent_direction: [
                    rng.gen_range(-10..=10),
                    rng.gen_range(-10..=10),
                    rng.gen_range(-10..=10),
                ],
            },
        );
    }
    submap
}

/// Submap with `n` random occupancy voxels.
pub fn random_occupancy_submap<R: Rng>(
    rng: &mut R,
    voxel_size: f32,
    n: usize,
    extent: f32,
) -> Submap {
    let mut submap = Submap::new(voxel_size);
    for _ in 0..n {
        submap.set_occupancy_voxel(
            random_point(rng, extent),
            OccupancyVoxel {
                log_odds: rng.gen_range(-8.0..8.0),
            },
        );
    }
    submap
}

/// Submap with `n` random feature voxels.
pub fn random_feature_submap<R: Rng>(
    rng: &mut R,
    voxel_size: f32,
    n: usize,
    extent: f32,
) -> Submap {
    let mut submap = Submap::new(voxel_size);
    for _ in 0..n {
        let mut voxel = FeatureVoxel {
            weight: rng.gen_range(0.0..50.0),
            ..Default::default()
        };
        for c in 0..FEATURE_ARRAY_NUM_ELEMENTS {
            voxel.features[c] = f16::from_f32(rng.gen_range(-2.0..2.0));
        }
        submap.set_feature_voxel(random_point(rng, extent), voxel);
    }
    submap
}

/// A random point in `[-extent, extent]^3`.
pub fn random_point<R: Rng>(rng: &mut R, extent: f32) -> [f32; 3] {
    [
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
    ]
}

/// `n` random points. Roughly half land in allocated space for the scene
/// extents the tests use; the rest exercise the miss path.
pub fn random_points<R: Rng>(rng: &mut R, n: usize, extent: f32) -> Vec<[f32; 3]> {
    (0..n).map(|_| random_point(rng, extent)).collect()
}

/// `n` random sphere queries (`[x, y, z, radius]`).
pub fn random_sphere_queries<R: Rng>(
    rng: &mut R,
    n: usize,
    extent: f32,
    max_radius: f32,
) -> Vec<[f32; 4]> {
    (0..n)
        .map(|_| {
            let p = random_point(rng, extent);
            [p[0], p[1], p[2], rng.gen_range(0.0..max_radius)]
        })
        .collect()
}
