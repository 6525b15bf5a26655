//! Two-stage anomaly classification over estimated curvature.
//!
//! With a zero search radius each point is judged on its own curvature.
//! With a positive radius the population variance of the curvatures inside a
//! point's neighborhood is tested instead, and an exceeding neighborhood
//! flags every member, not just the center. Both comparisons are strict.

use rayon::prelude::*;
use tracing::info;

use crate::spatial::SpatialIndex;
use crate::types::{PointCloud, PointColor, ProcessingParams};

/// Colorize the cloud: red for anomalous points, black otherwise.
pub fn classify(
    mut cloud: PointCloud,
    index: &SpatialIndex,
    params: &ProcessingParams,
) -> PointCloud {
    let radius = params.effective_radius();

    let flags = if radius == 0.0 {
        flag_by_point(&cloud, params.curvature_threshold)
    } else {
        flag_by_neighborhood(&cloud, index, radius, params.curvature_threshold)
    };

    for (point, flagged) in cloud.points.iter_mut().zip(&flags) {
        point.color = if *flagged {
            PointColor::RED
        } else {
            PointColor::BLACK
        };
    }

    let (black, red) = cloud.color_counts();
    info!(
        mode = if radius == 0.0 { "point" } else { "neighborhood" },
        flagged = red,
        unflagged = black,
        "classified cloud"
    );

    cloud
}

fn flag_by_point(cloud: &PointCloud, threshold: f64) -> Vec<bool> {
    cloud
        .points
        .iter()
        .map(|p| p.curvature > threshold)
        .collect()
}

fn flag_by_neighborhood(
    cloud: &PointCloud,
    index: &SpatialIndex,
    radius: f64,
    threshold: f64,
) -> Vec<bool> {
    // Neighborhoods whose curvature variance exceeds the threshold; each
    // flags all of its members, so membership is collected per neighborhood
    // and merged afterwards.
    let flagged_groups: Vec<Vec<usize>> = cloud
        .points
        .par_iter()
        .filter_map(|p| {
            let members = index.query_radius(&p.position, radius);
            let variance = population_variance(members.iter().map(|&i| cloud.points[i].curvature));
            (variance > threshold).then_some(members)
        })
        .collect();

    let mut flags = vec![false; cloud.len()];
    for group in flagged_groups {
        for i in group {
            flags[i] = true;
        }
    }
    flags
}

/// Population variance (divide by N, not N-1). Empty input yields zero.
fn population_variance(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
