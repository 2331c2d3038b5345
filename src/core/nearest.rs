use crate::core::parallel::WorkerPool;
use crate::types::{GeoError, GeoResult, Grid};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use rayon::prelude::*;

/// Bucket size of the k-d tree leaves. Grid clouds repeat every axis value
/// far more often than this; the immutable tree splits them anyway.
const BUCKET_SIZE: usize = 32;

type Tree = ImmutableKdTree<f64, u64, 2, BUCKET_SIZE>;

/// Ordered 2D points stored as two parallel coordinate columns
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    a: Vec<f64>,
    b: Vec<f64>,
}

impl PointCloud {
    pub fn new(a: Vec<f64>, b: Vec<f64>) -> GeoResult<Self> {
        if a.len() != b.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "point coordinates differ in length: {} != {}",
                a.len(),
                b.len()
            )));
        }
        Ok(Self { a, b })
    }

    /// Row-major cell centers of a grid
    pub fn from_grid(grid: &Grid) -> Self {
        let (a, b) = grid.cell_centers();
        Self { a, b }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn point(&self, i: usize) -> [f64; 2] {
        [self.a[i], self.b[i]]
    }

    fn points(&self) -> Vec<[f64; 2]> {
        self.a.iter().zip(&self.b).map(|(&a, &b)| [a, b]).collect()
    }
}

/// Nearest source point for a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the source point in the cloud the index was built from
    pub index: usize,
    pub distance: f64,
}

/// Immutable spatial index over a source point cloud.
///
/// Ties between coincident source points resolve in k-d tree order, which is
/// fixed for a given build.
pub struct NearestIndex {
    tree: Tree,
    len: usize,
}

impl NearestIndex {
    pub fn build(source: &PointCloud) -> GeoResult<Self> {
        if source.is_empty() {
            return Err(GeoError::EmptyInput(
                "cannot build a nearest-neighbour index on zero points".to_string(),
            ));
        }
        let points = source.points();
        if let Some(i) = points.iter().position(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return Err(GeoError::InvalidFormat(format!(
                "source point {} has non-finite coordinates {:?}",
                i, points[i]
            )));
        }
        let tree: Tree = ImmutableKdTree::new_from_slice(&points);
        log::debug!("Built k-d tree over {} points", points.len());
        Ok(Self {
            tree,
            len: points.len(),
        })
    }

    /// Number of indexed source points
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nearest source point, or `None` when the query is NaN or farther than `tolerance`
    pub fn nearest(&self, query: [f64; 2], tolerance: Option<f64>) -> Option<Neighbor> {
        if !query[0].is_finite() || !query[1].is_finite() {
            return None;
        }
        let found = self.tree.nearest_one::<SquaredEuclidean>(&query);
        let distance = found.distance.sqrt();
        if tolerance.map_or(false, |limit| distance > limit) {
            return None;
        }
        Some(Neighbor {
            index: found.item as usize,
            distance,
        })
    }

    /// Resolve every target point in parallel on the given pool
    pub fn query(
        &self,
        targets: &PointCloud,
        tolerance: Option<f64>,
        pool: &WorkerPool,
    ) -> Vec<Option<Neighbor>> {
        pool.install(|| {
            (0..targets.len())
                .into_par_iter()
                .map(|i| self.nearest(targets.point(i), tolerance))
                .collect()
        })
    }
}

/// Half the diagonal of a cell with the given spacings plus `epsilon`
pub fn half_diagonal_tolerance(dy: f64, dx: f64, epsilon: f64) -> f64 {
    ((dx / 2.0).powi(2) + (dy / 2.0).powi(2)).sqrt() + epsilon
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_cloud(rows: usize, cols: usize) -> PointCloud {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                a.push(r as f64);
                b.push(c as f64);
            }
        }
        PointCloud::new(a, b).unwrap()
    }

    #[test]
    fn test_empty_and_mismatched_input() {
        assert!(matches!(
            NearestIndex::build(&PointCloud::default()),
            Err(GeoError::EmptyInput(_))
        ));
        assert!(matches!(
            PointCloud::new(vec![0.0, 1.0], vec![0.0]),
            Err(GeoError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_nearest_with_tolerance() {
        let index = NearestIndex::build(&grid_cloud(4, 4)).unwrap();

        let hit = index.nearest([1.1, 2.2], None).unwrap();
        assert_eq!(hit.index, 6);
        assert_relative_eq!(hit.distance, (0.01f64 + 0.04).sqrt(), epsilon = 1e-12);

        assert!(index.nearest([1.1, 2.2], Some(0.1)).is_none());
        assert!(index.nearest([f64::NAN, 2.0], None).is_none());
        assert_eq!(index.nearest([10.0, 10.0], None).unwrap().index, 15);
    }

    #[test]
    fn test_query_repeated_axis_values() {
        // Every row shares one y value, far more than a leaf bucket holds
        let source = grid_cloud(3, 200);
        let index = NearestIndex::build(&source).unwrap();
        let pool = WorkerPool::sequential().unwrap();
        let found = index.query(&source, Some(0.25), &pool);
        assert_eq!(found.len(), 600);
        for (i, neighbor) in found.iter().enumerate() {
            let neighbor = neighbor.unwrap();
            assert_eq!(neighbor.index, i);
            assert_eq!(neighbor.distance, 0.0);
        }
    }

    #[test]
    fn test_build_on_large_lattices() {
        let pool = WorkerPool::new(Some(4)).unwrap();
        for (rows, cols) in [(100, 100), (10, 4000)] {
            let grid = Grid::new(
                ndarray::Array2::zeros((rows, cols)),
                crate::types::Coordinate::regular("y", 0.0, 1.0, rows),
                crate::types::Coordinate::regular("x", 0.0, 1.0, cols),
            )
            .unwrap();
            let source = PointCloud::from_grid(&grid);
            let index = NearestIndex::build(&source).unwrap();
            assert_eq!(index.len(), rows * cols);

            // Offsets below half a cell resolve to the cell itself
            let targets = PointCloud::new(
                (0..rows * cols).map(|i| (i / cols) as f64 + 0.3).collect(),
                (0..rows * cols).map(|i| (i % cols) as f64 - 0.2).collect(),
            )
            .unwrap();
            let found = index.query(&targets, Some(0.5), &pool);
            for (i, neighbor) in found.iter().enumerate() {
                assert_eq!(neighbor.map(|n| n.index), Some(i), "{}x{} lattice, cell {}", rows, cols, i);
            }
        }
    }

    #[test]
    fn test_parallel_query_matches_sequential() {
        let index = NearestIndex::build(&grid_cloud(20, 20)).unwrap();
        let targets = PointCloud::new(
            (0..100).map(|i| i as f64 * 0.19).collect(),
            (0..100).map(|i| 19.0 - i as f64 * 0.17).collect(),
        )
        .unwrap();
        let sequential = index.query(&targets, Some(0.8), &WorkerPool::sequential().unwrap());
        let parallel = index.query(&targets, Some(0.8), &WorkerPool::new(Some(4)).unwrap());
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_half_diagonal_tolerance() {
        assert_relative_eq!(half_diagonal_tolerance(2.0, 2.0, 0.0), 2f64.sqrt());
        assert_relative_eq!(half_diagonal_tolerance(1.0, 4.0, 1e-2), (0.25f64 + 4.0).sqrt() + 1e-2);
    }
}
