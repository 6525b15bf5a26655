//! Surface-variation curvature estimation.
//!
//! Curvature at a point is the surface variation of its eroded neighborhood:
//! the smallest eigenvalue of the neighborhood covariance matrix divided by
//! the eigenvalue sum. Flat neighborhoods score near zero, sharp features and
//! outliers score toward 1/3.

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::spatial::SpatialIndex;
use crate::types::{PointCloud, ProcessingParams};

/// Minimum neighborhood size for a meaningful covariance estimate.
const MIN_NEIGHBORS: usize = 3;

/// Guard against division by a vanishing eigenvalue sum.
const EIGEN_SUM_EPSILON: f64 = 1e-12;

/// Estimate curvature for every point in the cloud.
///
/// Each point's neighborhood is gathered within the effective radius, then
/// eroded to points within `(1 - erosion_ratio) * radius` so boundary
/// neighbors do not inflate the estimate. Neighborhoods with fewer than three
/// surviving points get curvature zero.
pub fn with_curvature(
    mut cloud: PointCloud,
    index: &SpatialIndex,
    params: &ProcessingParams,
) -> PointCloud {
    let radius = params.effective_radius();
    let eroded_radius = radius * (1.0 - params.erosion_ratio);

    let curvatures: Vec<f64> = cloud
        .points
        .par_iter()
        .map(|p| curvature_at(&p.position, index, radius, eroded_radius))
        .collect();

    for (point, c) in cloud.points.iter_mut().zip(curvatures) {
        point.curvature = c;
    }

    let nonzero = cloud.points.iter().filter(|p| p.curvature > 0.0).count();
    debug!(
        points = cloud.len(),
        nonzero_curvature = nonzero,
        radius,
        eroded_radius,
        "estimated curvature"
    );

    cloud
}

fn curvature_at(
    position: &Point3<f64>,
    index: &SpatialIndex,
    radius: f64,
    eroded_radius: f64,
) -> f64 {
    let neighbors = index.query_radius(position, radius);

    let eroded: Vec<Point3<f64>> = neighbors
        .into_iter()
        .map(|i| index.position(i))
        .filter(|n| (n - position).norm() <= eroded_radius)
        .collect();

    if eroded.len() < MIN_NEIGHBORS {
        return 0.0;
    }

    surface_variation(&eroded)
}

/// Smallest covariance eigenvalue over the eigenvalue sum, clamped to be
/// non-negative against eigen-solver noise.
fn surface_variation(points: &[Point3<f64>]) -> f64 {
    let covariance = covariance_matrix(points);
    let eigen = covariance.symmetric_eigen();

    let sum: f64 = eigen.eigenvalues.iter().sum();
    if sum.abs() < EIGEN_SUM_EPSILON {
        return 0.0;
    }

    let min = eigen
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);

    (min / sum).max(0.0)
}

fn covariance_matrix(points: &[Point3<f64>]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let mean: Vector3<f64> = points
        .iter()
        .map(|p| p.coords)
        .fold(Vector3::zeros(), |acc, v| acc + v)
        / n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    cov / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar_cloud() -> PointCloud {
        let mut cloud = PointCloud::new();
        for x in 0..10 {
            for y in 0..10 {
                cloud.push_coords(x as f64 * 0.01, y as f64 * 0.01, 0.0);
            }
        }
        cloud
    }

    #[test]
    fn planar_points_have_near_zero_curvature() {
        let cloud = planar_cloud();
        let index = SpatialIndex::build(&cloud);
        let params = ProcessingParams {
            roi_radius: 0.05,
            erosion_ratio: 0.0,
            ..Default::default()
        };

        let cloud = with_curvature(cloud, &index, &params);
        for p in &cloud.points {
            assert!(p.curvature < 1e-9, "curvature {} on a plane", p.curvature);
        }
    }

    #[test]
    fn spike_scores_higher_than_plane() {
        let mut cloud = planar_cloud();
        // Pull one interior point well out of the plane.
        let spike = cloud
            .points
            .iter()
            .position(|p| {
                (p.position.x - 0.05).abs() < 1e-9 && (p.position.y - 0.05).abs() < 1e-9
            })
            .unwrap();
        cloud.points[spike].position.z = 0.03;

        let index = SpatialIndex::build(&cloud);
        let params = ProcessingParams {
            roi_radius: 0.05,
            erosion_ratio: 0.0,
            ..Default::default()
        };
        let cloud = with_curvature(cloud, &index, &params);

        let plane_curvature = cloud.points[0].curvature;
        assert!(cloud.points[spike].curvature > plane_curvature);
        assert!(cloud.points[spike].curvature > 1e-4);
    }

    #[test]
    fn sparse_neighborhood_gets_zero_curvature() {
        let mut cloud = PointCloud::new();
        cloud.push_coords(0.0, 0.0, 0.0);
        cloud.push_coords(10.0, 0.0, 0.0);

        let index = SpatialIndex::build(&cloud);
        let params = ProcessingParams {
            roi_radius: 0.1,
            ..Default::default()
        };
        let cloud = with_curvature(cloud, &index, &params);
        assert!(cloud.points.iter().all(|p| p.curvature == 0.0));
    }

    #[test]
    fn full_erosion_empties_every_neighborhood() {
        let cloud = planar_cloud();
        let index = SpatialIndex::build(&cloud);
        let params = ProcessingParams {
            roi_radius: 0.05,
            erosion_ratio: 1.0,
            ..Default::default()
        };

        let cloud = with_curvature(cloud, &index, &params);
        assert!(cloud.points.iter().all(|p| p.curvature == 0.0));
    }

    #[test]
    fn curvature_is_rigid_motion_invariant() {
        let mut cloud = planar_cloud();
        let spike = 55;
        cloud.points[spike].position.z = 0.02;

        // Radius chosen off the grid's exact inter-point distances so
        // floating-point jitter from the rotation cannot flip membership.
        let params = ProcessingParams {
            roi_radius: 0.045,
            erosion_ratio: 0.0,
            ..Default::default()
        };

        let index = SpatialIndex::build(&cloud);
        let original = with_curvature(cloud.clone(), &index, &params);

        // Rotate about an arbitrary axis and translate.
        let rotation = nalgebra::Rotation3::from_axis_angle(
            &nalgebra::Unit::new_normalize(Vector3::new(1.0, 2.0, 3.0)),
            0.7,
        );
        let offset = Vector3::new(10.0, -4.0, 2.5);
        for p in cloud.points.iter_mut() {
            p.position = rotation * p.position + offset;
        }

        let index = SpatialIndex::build(&cloud);
        let moved = with_curvature(cloud, &index, &params);

        for (a, b) in original.points.iter().zip(moved.points.iter()) {
            assert!(
                (a.curvature - b.curvature).abs() < 1e-9,
                "{} vs {}",
                a.curvature,
                b.curvature
            );
        }
    }

    #[test]
    fn coincident_points_have_zero_eigenvalue_sum() {
        let mut cloud = PointCloud::new();
        for _ in 0..5 {
            cloud.push_coords(1.0, 1.0, 1.0);
        }
        let index = SpatialIndex::build(&cloud);
        let params = ProcessingParams {
            roi_radius: 0.1,
            erosion_ratio: 0.0,
            ..Default::default()
        };
        let cloud = with_curvature(cloud, &index, &params);
        assert!(cloud.points.iter().all(|p| p.curvature == 0.0));
    }
}
