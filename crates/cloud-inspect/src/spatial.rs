//! Immutable nearest-neighbor index over a point set.
//!
//! The index is built once per point-cloud snapshot and never mutated; if the
//! underlying points change, callers rebuild. Radius queries use exact
//! Euclidean semantics: every point within distance `r` inclusive is
//! returned, and nothing farther.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Point3;

use crate::types::PointCloud;

/// KD-tree index over an owned snapshot of point positions.
///
/// Backed by kiddo's immutable tree: the mutable tree rejects more than a
/// bucketful of points sharing a coordinate on one axis, and flat scanned
/// surfaces do exactly that.
pub struct SpatialIndex {
    tree: Option<ImmutableKdTree<f64, u64, 3, 256>>,
    positions: Vec<Point3<f64>>,
}

/// Widen a squared search radius so kiddo's boundary-exclusive `within`
/// cannot drop points at exactly the query distance. The exact `<= r2`
/// post-filter restores strict semantics afterwards. The floor keeps a zero
/// radius able to find coincident points (distance 0).
fn inclusive_search_radius(r2: f64) -> f64 {
    (r2 * (1.0 + 4.0 * f64::EPSILON)).max(f64::MIN_POSITIVE)
}

impl SpatialIndex {
    /// Build an index over the positions of a point cloud.
    pub fn build(cloud: &PointCloud) -> Self {
        Self::from_positions(cloud.points.iter().map(|p| p.position))
    }

    /// Build an index from an iterator of positions.
    pub fn from_positions(positions: impl IntoIterator<Item = Point3<f64>>) -> Self {
        let positions: Vec<Point3<f64>> = positions.into_iter().collect();
        let entries: Vec<[f64; 3]> = positions.iter().map(|p| [p.x, p.y, p.z]).collect();
        let tree = if entries.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(&entries))
        };
        Self { tree, positions }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position of an indexed point.
    #[inline]
    pub fn position(&self, index: usize) -> Point3<f64> {
        self.positions[index]
    }

    /// Indices of all points within Euclidean distance `radius` of `query`,
    /// boundary inclusive.
    ///
    /// `radius = 0` returns only points coincident with the query. A negative
    /// radius is treated as its absolute value.
    pub fn query_radius(&self, query: &Point3<f64>, radius: f64) -> Vec<usize> {
        let tree = match &self.tree {
            Some(tree) => tree,
            None => return Vec::new(),
        };
        let r = radius.abs();
        let r2 = r * r;
        tree.within::<SquaredEuclidean>(
            &[query.x, query.y, query.z],
            inclusive_search_radius(r2),
        )
        .into_iter()
        .filter(|n| n.distance <= r2)
        .map(|n| n.item as usize)
        .collect()
    }

    /// Hybrid search: at most `max_neighbors` nearest points, restricted to
    /// those within `radius` of the query.
    pub fn query_radius_capped(
        &self,
        query: &Point3<f64>,
        radius: f64,
        max_neighbors: usize,
    ) -> Vec<usize> {
        let tree = match &self.tree {
            Some(tree) => tree,
            None => return Vec::new(),
        };
        let r = radius.abs();
        let r2 = r * r;
        tree.nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], max_neighbors)
            .into_iter()
            .filter(|n| n.distance <= r2)
            .map(|n| n.item as usize)
            .collect()
    }

    /// The `k` nearest points to the query regardless of distance.
    pub fn nearest_n(&self, query: &Point3<f64>, k: usize) -> Vec<usize> {
        let tree = match &self.tree {
            Some(tree) => tree,
            None => return Vec::new(),
        };
        tree.nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k)
            .into_iter()
            .map(|n| n.item as usize)
            .collect()
    }

    /// Index and squared distance of the single nearest point.
    ///
    /// Returns `None` for an empty index.
    pub fn nearest_one(&self, query: &Point3<f64>) -> Option<(usize, f64)> {
        let tree = self.tree.as_ref()?;
        let n = tree.nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        Some((n.item as usize, n.distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_cloud() -> PointCloud {
        let mut cloud = PointCloud::new();
        for x in 0..5 {
            for y in 0..5 {
                cloud.push_coords(x as f64, y as f64, 0.0);
            }
        }
        cloud
    }

    #[test]
    fn radius_query_is_boundary_inclusive() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);

        // Distance from (2,2) to (3,2) is exactly 1.0.
        let hits = index.query_radius(&Point3::new(2.0, 2.0, 0.0), 1.0);
        assert_eq!(hits.len(), 5); // self + 4 axis neighbors

        let diag = index.query_radius(&Point3::new(2.0, 2.0, 0.0), 2.0_f64.sqrt());
        assert_eq!(diag.len(), 9); // 3x3 block around the query
    }

    #[test]
    fn zero_radius_returns_only_coincident_points() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);

        let hits = index.query_radius(&Point3::new(2.0, 2.0, 0.0), 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(index.position(hits[0]), Point3::new(2.0, 2.0, 0.0));

        let off_grid = index.query_radius(&Point3::new(2.5, 2.5, 0.0), 0.0);
        assert!(off_grid.is_empty());
    }

    #[test]
    fn nothing_beyond_the_radius_is_returned() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let q = Point3::new(2.0, 2.0, 0.0);

        // The widened internal search must not leak false positives: just
        // under the diagonal distance only the axis neighbors qualify.
        let hits = index.query_radius(&q, 1.4);
        assert_eq!(hits.len(), 5);
        for i in hits {
            assert!((index.position(i) - q).norm() <= 1.4);
        }
    }

    #[test]
    fn negative_radius_matches_absolute_value() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let q = Point3::new(2.0, 2.0, 0.0);

        let mut pos = index.query_radius(&q, 1.5);
        let mut neg = index.query_radius(&q, -1.5);
        pos.sort_unstable();
        neg.sort_unstable();
        assert_eq!(pos, neg);
    }

    #[test]
    fn capped_query_respects_both_limits() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let q = Point3::new(2.0, 2.0, 0.0);

        // Radius admits 9 points but the cap keeps only the 3 nearest.
        let hits = index.query_radius_capped(&q, 2.0, 3);
        assert_eq!(hits.len(), 3);

        // Cap admits many but the radius keeps only the query point itself.
        let hits = index.query_radius_capped(&q, 0.5, 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn large_coplanar_clouds_build() {
        // Hundreds of points sharing z = 0, far beyond any bucket capacity;
        // a flat scanned plate is exactly this shape.
        let mut cloud = PointCloud::new();
        for x in 0..30 {
            for y in 0..30 {
                cloud.push_coords(x as f64, y as f64, 0.0);
            }
        }

        let index = SpatialIndex::build(&cloud);
        assert_eq!(index.len(), 900);

        let hits = index.query_radius(&Point3::new(15.0, 15.0, 0.0), 1.0);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn duplicate_positions_are_all_indexed() {
        let mut cloud = PointCloud::new();
        for _ in 0..40 {
            cloud.push_coords(1.0, 2.0, 3.0);
        }

        let index = SpatialIndex::build(&cloud);
        let hits = index.query_radius(&Point3::new(1.0, 2.0, 3.0), 0.0);
        assert_eq!(hits.len(), 40);
    }

    #[test]
    fn nearest_one_on_empty_index() {
        let index = SpatialIndex::from_positions(std::iter::empty());
        assert!(index.nearest_one(&Point3::origin()).is_none());
        assert!(index.query_radius(&Point3::origin(), 1.0).is_empty());
        assert!(index.nearest_n(&Point3::origin(), 3).is_empty());
    }
}
