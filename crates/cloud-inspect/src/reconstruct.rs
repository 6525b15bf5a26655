//! Implicit surface reconstruction from point clouds.
//!
//! Normals are estimated per point from a hybrid neighborhood search, then a
//! signed distance field is sampled over a bounded voxel grid and the zero
//! isosurface is extracted with surface nets. Each output vertex carries a
//! normalized density: how many input samples support it within a voxel-scale
//! radius, scaled so the best-supported vertex has density 1.

use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, info, warn};

use crate::error::{CloudError, CloudResult};
use crate::spatial::SpatialIndex;
use crate::types::{Mesh, PointCloud, Vertex};

/// Grid resolution is capped at 64 cells per axis regardless of depth.
const MAX_GRID_CELLS: u32 = 64;

/// Parameters for surface reconstruction.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionParams {
    /// Radius of the hybrid neighborhood search used for normal estimation.
    pub normal_radius: f64,

    /// Cap on neighbors considered per normal estimate.
    pub normal_max_neighbors: usize,

    /// Octree depth; the voxel grid has `min(2^depth, 64)` cells per axis.
    pub octree_depth: u32,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            normal_radius: 0.1,
            normal_max_neighbors: 30,
            octree_depth: 9,
        }
    }
}

impl ReconstructionParams {
    /// Cells per grid axis implied by the octree depth.
    pub fn grid_cells(&self) -> u32 {
        1u32.checked_shl(self.octree_depth)
            .unwrap_or(u32::MAX)
            .min(MAX_GRID_CELLS)
    }
}

/// Reconstruct a triangle mesh approximating the surface sampled by `cloud`.
///
/// Fails on an empty cloud and on degenerate (zero-extent) bounds; any other
/// cloud produces a mesh, possibly empty if the samples span no surface at
/// the grid resolution.
pub fn reconstruct_surface(cloud: &PointCloud, params: &ReconstructionParams) -> CloudResult<Mesh> {
    let start = std::time::Instant::now();

    if cloud.is_empty() {
        return Err(CloudError::empty_cloud(
            "cannot reconstruct a surface from zero points",
        ));
    }

    let index = SpatialIndex::build(cloud);
    let mut normals = estimate_normals(cloud, &index, params);
    orient_normals_outward(cloud, &mut normals);

    let (min_bound, max_bound) = cloud.bounds().ok_or_else(|| {
        CloudError::empty_cloud("cannot reconstruct a surface from zero points")
    })?;

    let extent = max_bound - min_bound;
    let max_extent = extent.x.max(extent.y).max(extent.z);
    if max_extent <= 0.0 {
        return Err(CloudError::ReconstructionFailed {
            details: "point cloud bounds have zero extent".to_string(),
        });
    }

    let cells = params.grid_cells();
    let padding = (max_extent / cells as f64) * 3.0;
    let min_bound = Point3::new(
        min_bound.x - padding,
        min_bound.y - padding,
        min_bound.z - padding,
    );
    let voxel_size = (max_extent + 2.0 * padding) / cells as f64;

    info!(
        points = cloud.len(),
        cells, voxel_size, "SDF reconstruction"
    );

    let sdf = sample_sdf(cloud, &index, &normals, min_bound, voxel_size, cells);
    let mut mesh = extract_isosurface(&sdf, cells, min_bound, voxel_size);

    assign_densities(&mut mesh, &index, voxel_size);

    if mesh.is_empty() {
        warn!("reconstruction produced an empty mesh");
    }

    debug!(
        elapsed = ?start.elapsed(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "SDF reconstruction completed"
    );

    Ok(mesh)
}

/// Estimate a unit normal per point from the smallest covariance eigenvector
/// of its hybrid neighborhood. Sparse neighborhoods fall back to +Z.
fn estimate_normals(
    cloud: &PointCloud,
    index: &SpatialIndex,
    params: &ReconstructionParams,
) -> Vec<Vector3<f64>> {
    cloud
        .points
        .iter()
        .map(|point| {
            let neighbors = index.query_radius_capped(
                &point.position,
                params.normal_radius,
                params.normal_max_neighbors,
            );

            if neighbors.len() < 3 {
                return Vector3::new(0.0, 0.0, 1.0);
            }

            let neighbor_points: Vec<Point3<f64>> =
                neighbors.iter().map(|&i| index.position(i)).collect();

            let centroid: Vector3<f64> = neighbor_points
                .iter()
                .map(|p| p.coords)
                .fold(Vector3::zeros(), |acc, v| acc + v)
                / neighbor_points.len() as f64;

            let mut cov = Matrix3::zeros();
            for np in &neighbor_points {
                let d = np.coords - centroid;
                cov += d * d.transpose();
            }

            let eig = cov.symmetric_eigen();
            let mut min_idx = 0;
            let mut min_val = eig.eigenvalues[0];
            for i in 1..3 {
                if eig.eigenvalues[i] < min_val {
                    min_val = eig.eigenvalues[i];
                    min_idx = i;
                }
            }

            let normal = eig.eigenvectors.column(min_idx).into_owned();
            let norm = normal.norm();
            if norm > 1e-10 {
                normal / norm
            } else {
                Vector3::new(0.0, 0.0, 1.0)
            }
        })
        .collect()
}

/// Flip normals that point toward the cloud centroid, so the SDF sign
/// convention is consistent across the surface.
fn orient_normals_outward(cloud: &PointCloud, normals: &mut [Vector3<f64>]) {
    let centroid = match cloud.centroid() {
        Some(c) => c,
        None => return,
    };

    for (point, normal) in cloud.points.iter().zip(normals.iter_mut()) {
        let to_point = point.position - centroid;
        if normal.dot(&to_point) < 0.0 {
            *normal = -*normal;
        }
    }
}

/// Sample the signed distance field at cell centers of a cubic grid.
fn sample_sdf(
    cloud: &PointCloud,
    index: &SpatialIndex,
    normals: &[Vector3<f64>],
    min_bound: Point3<f64>,
    voxel_size: f64,
    cells: u32,
) -> Vec<f64> {
    let dim = cells as usize;
    let mut sdf_values = vec![f64::MAX; dim * dim * dim];

    for iz in 0..dim {
        for iy in 0..dim {
            for ix in 0..dim {
                let idx = ix + iy * dim + iz * dim * dim;
                let pos = Point3::new(
                    min_bound.x + (ix as f64 + 0.5) * voxel_size,
                    min_bound.y + (iy as f64 + 0.5) * voxel_size,
                    min_bound.z + (iz as f64 + 0.5) * voxel_size,
                );

                // Sign the distance by which side of the nearest point's
                // tangent plane the sample falls on.
                if let Some((nearest, d2)) = index.nearest_one(&pos) {
                    let dist = d2.sqrt();
                    let to_grid = pos - cloud.points[nearest].position;
                    let sign = if to_grid.dot(&normals[nearest]) >= 0.0 {
                        1.0
                    } else {
                        -1.0
                    };
                    sdf_values[idx] = sign * dist;
                }
            }
        }
    }

    sdf_values
}

/// Extract the zero isosurface with surface nets on a padded grid.
fn extract_isosurface(
    sdf_values: &[f64],
    cells: u32,
    min_bound: Point3<f64>,
    voxel_size: f64,
) -> Mesh {
    use fast_surface_nets::ndshape::ConstShape;
    use fast_surface_nets::{ndshape::ConstShape3u32, surface_nets, SurfaceNetsBuffer};

    // One layer of padding on each side keeps the surface closed at grid
    // boundaries; 66 = 64 interior cells + 2.
    type SampleShape = ConstShape3u32<66, 66, 66>;

    let dim = cells as usize;
    let mut padded_sdf = vec![1.0f32; SampleShape::SIZE as usize];
    for iz in 0..dim {
        for iy in 0..dim {
            for ix in 0..dim {
                let src_idx = ix + iy * dim + iz * dim * dim;
                let dst_idx = (ix + 1) + (iy + 1) * 66 + (iz + 1) * 66 * 66;
                padded_sdf[dst_idx] = sdf_values[src_idx] as f32;
            }
        }
    }

    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(&padded_sdf, &SampleShape {}, [0; 3], [65; 3], &mut buffer);

    let mut mesh = Mesh::new();

    for pos in &buffer.positions {
        let world_pos = Point3::new(
            min_bound.x + (pos[0] as f64 - 1.0) * voxel_size,
            min_bound.y + (pos[1] as f64 - 1.0) * voxel_size,
            min_bound.z + (pos[2] as f64 - 1.0) * voxel_size,
        );
        mesh.vertices.push(Vertex::new(world_pos));
    }

    for chunk in buffer.indices.chunks(3) {
        if chunk.len() == 3 {
            mesh.faces.push([chunk[0], chunk[1], chunk[2]]);
        }
    }

    mesh
}

/// Per-vertex sample support, normalized so the maximum is 1.
///
/// When no vertex has any support the densities stay zero rather than
/// dividing by zero.
fn assign_densities(mesh: &mut Mesh, index: &SpatialIndex, voxel_size: f64) {
    let support_radius = voxel_size * 1.5;

    for v in mesh.vertices.iter_mut() {
        v.density = index.query_radius(&v.position, support_radius).len() as f64;
    }

    let max = mesh
        .vertices
        .iter()
        .map(|v| v.density)
        .fold(0.0_f64, f64::max);

    if max > 0.0 {
        for v in mesh.vertices.iter_mut() {
            v.density /= max;
        }
    }
}
