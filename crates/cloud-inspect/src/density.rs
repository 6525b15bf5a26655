//! Density-based mesh vertex filtering.
//!
//! A reconstructed vertex survives only if it is close enough to the source
//! cloud. Support is binary: a vertex with at least one source point within
//! the ROI radius is assigned the mesh-wide mean density, an unsupported
//! vertex gets zero, and the threshold is then applied to the assigned value.
//! Assigned densities are stored back on the retained vertices, so running
//! the filter twice with the same inputs removes nothing new.

use tracing::info;

use crate::spatial::SpatialIndex;
use crate::types::{Mesh, ProcessingParams};

/// Filter mesh vertices by proximity-gated density, dropping faces that lose
/// a vertex and reindexing the rest.
pub fn filter_by_density(mut mesh: Mesh, source: &SpatialIndex, params: &ProcessingParams) -> Mesh {
    let radius = params.effective_radius();
    let mean = mesh.mean_density();

    let assigned: Vec<f64> = mesh
        .vertices
        .iter()
        .map(|v| {
            if source.query_radius(&v.position, radius).is_empty() {
                0.0
            } else {
                mean
            }
        })
        .collect();

    let keep: Vec<bool> = assigned
        .iter()
        .map(|&d| d >= params.density_threshold)
        .collect();

    for (v, &d) in mesh.vertices.iter_mut().zip(&assigned) {
        v.density = d;
    }

    let before_vertices = mesh.vertex_count();
    let before_faces = mesh.face_count();
    let filtered = retain_vertices(mesh, &keep);

    info!(
        kept_vertices = filtered.vertex_count(),
        removed_vertices = before_vertices - filtered.vertex_count(),
        kept_faces = filtered.face_count(),
        removed_faces = before_faces - filtered.face_count(),
        mean_density = mean,
        "density filter applied"
    );

    filtered
}

/// Drop vertices where `keep` is false, remap face indices, and discard any
/// face that references a dropped vertex.
fn retain_vertices(mesh: Mesh, keep: &[bool]) -> Mesh {
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut vertices = Vec::with_capacity(mesh.vertices.len());

    for (i, v) in mesh.vertices.into_iter().enumerate() {
        if keep[i] {
            remap[i] = vertices.len() as u32;
            vertices.push(v);
        }
    }

    let faces = mesh
        .faces
        .into_iter()
        .filter_map(|f| {
            let mapped = [
                remap[f[0] as usize],
                remap[f[1] as usize],
                remap[f[2] as usize],
            ];
            mapped.iter().all(|&i| i != u32::MAX).then_some(mapped)
        })
        .collect();

    Mesh { vertices, faces }
}
