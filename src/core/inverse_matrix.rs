use crate::config::GeocodeConfig;
use crate::core::nearest::{NearestIndex, PointCloud};
use crate::core::parallel::{ProgressCounter, WorkerPool};
use crate::io::trans_table::{BlockExtent, TranslationTable};
use crate::types::{
    CellIndex, Coordinate, CoordinateSystem, GeoError, GeoResult, Grid, GridRegistration,
    IndexMatrix, MatrixKind,
};
use ndarray::{s, Array2};
use rayon::prelude::*;
use std::ops::Range;

/// Rectangular piece of the radar grid resolved independently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Tile {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }
}

/// Builds the geographic -> radar matrix: for every radar cell, the flattened
/// translation table index of its nearest sample.
///
/// The radar grid is cut into tiles; each tile only searches the table blocks
/// whose azimuth/range extent meets the tile bounds (expanded by `margin`).
#[derive(Debug, Clone)]
pub struct InverseMatrixBuilder {
    chunk_size: usize,
    margin: f64,
}

impl Default for InverseMatrixBuilder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl InverseMatrixBuilder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            margin: 1.0,
        }
    }

    pub fn from_config(config: &GeocodeConfig) -> Self {
        Self::new(config.chunk_size)
    }

    /// Tiles covering a grid of the given shape, row-major
    pub fn tiles(&self, shape: (usize, usize)) -> Vec<Tile> {
        let (rows, cols) = shape;
        let mut tiles = Vec::new();
        for r0 in (0..rows).step_by(self.chunk_size) {
            for c0 in (0..cols).step_by(self.chunk_size) {
                tiles.push(Tile {
                    rows: r0..(r0 + self.chunk_size).min(rows),
                    cols: c0..(c0 + self.chunk_size).min(cols),
                });
            }
        }
        tiles
    }

    /// Resolve one tile against the candidate table blocks
    pub fn resolve_tile(
        &self,
        azimuths: &Coordinate,
        ranges: &Coordinate,
        tile: &Tile,
        table: &TranslationTable,
        extents: &[BlockExtent],
    ) -> GeoResult<Array2<CellIndex>> {
        let azi = &azimuths.values[tile.rows.clone()];
        let rng = &ranges.values[tile.cols.clone()];
        if azi.is_empty() || rng.is_empty() {
            return Ok(Array2::from_elem(tile.shape(), CellIndex::NONE));
        }
        let (y_min, y_max) = min_max(azi);
        let (x_min, x_max) = min_max(rng);

        let candidates: Vec<&BlockExtent> = extents
            .iter()
            .filter(|e| e.intersects(y_min, y_max, x_min, x_max, self.margin))
            .collect();
        log::debug!(
            "Tile rows {:?} cols {:?}: {} candidate blocks {:?}",
            tile.rows,
            tile.cols,
            candidates.len(),
            candidates
                .iter()
                .map(|e| (e.block_row, e.block_col))
                .collect::<Vec<_>>()
        );

        let mut samples = Vec::new();
        for extent in &candidates {
            samples.extend(table.block_samples(extent.block_row, extent.block_col));
        }
        if samples.is_empty() {
            log::warn!(
                "No translation table samples near tile rows {:?} cols {:?}; leaving it unmatched",
                tile.rows,
                tile.cols
            );
            return Ok(Array2::from_elem(tile.shape(), CellIndex::NONE));
        }

        let cloud = PointCloud::new(
            samples.iter().map(|&(a, _, _)| a).collect(),
            samples.iter().map(|&(_, r, _)| r).collect(),
        )?;
        let index = NearestIndex::build(&cloud)?;

        // Radar cells are assumed to be covered, so no distance limit
        let mut block = Array2::from_elem(tile.shape(), CellIndex::NONE);
        for (i, &a) in azi.iter().enumerate() {
            for (j, &r) in rng.iter().enumerate() {
                if let Some(neighbor) = index.nearest([a, r], None) {
                    block[[i, j]] = CellIndex::new(samples[neighbor.index].2)?;
                }
            }
        }
        Ok(block)
    }

    /// Build the inverse matrix; tiles run in parallel on `pool` and each
    /// completed tile ticks `progress`
    pub fn build(
        &self,
        reference: &Grid,
        table: &TranslationTable,
        extents: &[BlockExtent],
        pool: &WorkerPool,
        progress: Option<&ProgressCounter>,
    ) -> GeoResult<IndexMatrix> {
        reference.require_system(CoordinateSystem::Radar)?;
        if table.is_empty() {
            return Err(GeoError::EmptyInput("translation table has no records".to_string()));
        }
        // Every table label has to fit a CellIndex
        CellIndex::new(table.len() - 1)?;

        let shape = reference.shape();
        let tiles = self.tiles(shape);
        log::info!(
            "Building inverse matrix: radar grid {:?} in {} tiles, {} table blocks",
            shape,
            tiles.len(),
            extents.len()
        );

        let resolved: Vec<(Tile, Array2<CellIndex>)> = pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| -> GeoResult<(Tile, Array2<CellIndex>)> {
                    let block =
                        self.resolve_tile(&reference.rows, &reference.cols, tile, table, extents)?;
                    if let Some(counter) = progress {
                        counter.tick();
                    }
                    Ok((tile.clone(), block))
                })
                .collect::<GeoResult<Vec<_>>>()
        })?;

        let mut indices = Array2::from_elem(shape, CellIndex::NONE);
        for (tile, block) in resolved {
            indices
                .slice_mut(s![tile.rows.clone(), tile.cols.clone()])
                .assign(&block);
        }

        let matrix = IndexMatrix::new(
            MatrixKind::Inverse,
            indices,
            reference.rows.clone(),
            reference.cols.clone(),
            table.lat().clone(),
            table.lon().clone(),
            GridRegistration::Gridline,
        )?;
        log::info!(
            "✅ Inverse matrix built: {:?}, {:.1}% coverage",
            matrix.shape(),
            matrix.coverage()
        );
        Ok(matrix)
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}
