//! Core point cloud and mesh value types.

use nalgebra::{Point3, Vector3};

/// RGB color with 8-bit channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PointColor {
    /// Unflagged points are pure black.
    pub const BLACK: PointColor = PointColor { r: 0, g: 0, b: 0 };

    /// Flagged (anomalous) points are pure red.
    pub const RED: PointColor = PointColor { r: 255, g: 0, b: 0 };

    /// Create a new color from RGB components.
    #[inline]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Clamp wider-than-byte channel values into [0, 255].
    #[inline]
    pub fn from_clamped(r: i32, g: i32, b: i32) -> Self {
        Self {
            r: r.clamp(0, 255) as u8,
            g: g.clamp(0, 255) as u8,
            b: b.clamp(0, 255) as u8,
        }
    }

    /// True for pure black (no channel set).
    #[inline]
    pub fn is_black(&self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }
}

/// A point in the cloud with its derived attributes.
///
/// `curvature` and `color` are never supplied by input files beyond their
/// defaults; they are populated by the curvature estimator and the anomaly
/// classifier respectively.
#[derive(Debug, Clone)]
pub struct CloudPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Surface-variation curvature, zero until estimated.
    pub curvature: f64,

    /// Classification color, black until classified.
    pub color: PointColor,
}

impl CloudPoint {
    /// Create a point with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            curvature: 0.0,
            color: PointColor::BLACK,
        }
    }

    /// Create a point from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// An ordered collection of 3D points.
///
/// Point order is stable but carries no meaning beyond input order.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a list of positions.
    pub fn from_positions(positions: &[Point3<f64>]) -> Self {
        Self {
            points: positions.iter().map(|&p| CloudPoint::new(p)).collect(),
        }
    }

    /// Number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: CloudPoint) {
        self.points.push(point);
    }

    /// Add a point from coordinates.
    #[inline]
    pub fn push_coords(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(CloudPoint::from_coords(x, y, z));
    }

    /// Compute the axis-aligned bounding box.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        if self.points.is_empty() {
            return None;
        }

        let mut min = self.points[0].position;
        let mut max = self.points[0].position;

        for p in &self.points[1..] {
            min.x = min.x.min(p.position.x);
            min.y = min.y.min(p.position.y);
            min.z = min.z.min(p.position.z);
            max.x = max.x.max(p.position.x);
            max.y = max.y.max(p.position.y);
            max.z = max.z.max(p.position.z);
        }

        Some((min, max))
    }

    /// Compute the centroid (center of mass) of the point cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }

        let sum: Vector3<f64> = self
            .points
            .iter()
            .map(|p| p.position.coords)
            .fold(Vector3::zeros(), |acc, v| acc + v);

        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Count points by classification color: (unflagged black, flagged red).
    pub fn color_counts(&self) -> (usize, usize) {
        let black = self.points.iter().filter(|p| p.color.is_black()).count();
        let red = self
            .points
            .iter()
            .filter(|p| p.color == PointColor::RED)
            .count();
        (black, red)
    }
}

/// A mesh vertex with its reconstruction density.
///
/// `density` is a normalized sample-support confidence in [0, 1]; it is used
/// to decide vertex retention and is never written to output files.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub position: Point3<f64>,
    pub density: f64,
}

impl Vertex {
    /// Create a vertex with zero density.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            density: 0.0,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// Invariant: every face index references a valid vertex. Operations that
/// remove vertices must also drop or reindex incident faces.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh has no geometry at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Mean of the per-vertex densities, zero for an empty mesh.
    pub fn mean_density(&self) -> f64 {
        if self.vertices.is_empty() {
            return 0.0;
        }
        self.vertices.iter().map(|v| v.density).sum::<f64>() / self.vertices.len() as f64
    }

    /// Check that every face references a valid vertex index.
    pub fn faces_are_valid(&self) -> bool {
        let n = self.vertices.len() as u32;
        self.faces.iter().all(|f| f.iter().all(|&i| i < n))
    }
}

/// Processing parameters, fixed for the duration of a run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingParams {
    /// Neighborhood radius for curvature, classification and density support.
    pub roi_radius: f64,

    /// Curvature threshold (point mode) or curvature-variance threshold
    /// (neighborhood mode).
    pub curvature_threshold: f64,

    /// Fraction by which the search radius shrinks when eroding curvature
    /// neighborhoods, in [0, 1].
    pub erosion_ratio: f64,

    /// Minimum normalized density for a mesh vertex to survive filtering,
    /// in [0, 1].
    pub density_threshold: f64,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            roi_radius: 0.1,
            curvature_threshold: 0.1,
            erosion_ratio: 0.1,
            density_threshold: 0.1,
        }
    }
}

impl ProcessingParams {
    /// Radius actually used for queries. A negative `roi_radius` is treated
    /// as its absolute value rather than rejected.
    #[inline]
    pub fn effective_radius(&self) -> f64 {
        self.roi_radius.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_clamping() {
        let c = PointColor::from_clamped(300, -5, 128);
        assert_eq!(c, PointColor::new(255, 0, 128));
    }

    #[test]
    fn cloud_point_defaults_are_derived_fields() {
        let p = CloudPoint::from_coords(1.0, 2.0, 3.0);
        assert_eq!(p.curvature, 0.0);
        assert_eq!(p.color, PointColor::BLACK);
    }

    #[test]
    fn cloud_bounds_and_centroid() {
        let mut cloud = PointCloud::new();
        cloud.push_coords(0.0, 0.0, 0.0);
        cloud.push_coords(2.0, 4.0, -2.0);

        let (min, max) = cloud.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, -2.0));
        assert_eq!(max, Point3::new(2.0, 4.0, 0.0));

        let c = cloud.centroid().unwrap();
        assert_eq!(c, Point3::new(1.0, 2.0, -1.0));
    }

    #[test]
    fn empty_cloud_has_no_bounds() {
        let cloud = PointCloud::new();
        assert!(cloud.bounds().is_none());
        assert!(cloud.centroid().is_none());
    }

    #[test]
    fn mesh_mean_density() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex {
            position: Point3::origin(),
            density: 0.2,
        });
        mesh.vertices.push(Vertex {
            position: Point3::origin(),
            density: 0.8,
        });
        assert!((mesh.mean_density() - 0.5).abs() < 1e-12);
        assert_eq!(Mesh::new().mean_density(), 0.0);
    }

    #[test]
    fn negative_radius_is_absolute() {
        let params = ProcessingParams {
            roi_radius: -0.5,
            ..Default::default()
        };
        assert_eq!(params.effective_radius(), 0.5);
    }
}
