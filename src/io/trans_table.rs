//! Translation table ("trans.dat") access and block partitioning

use crate::core::nearest::PointCloud;
use crate::types::{Coordinate, GeoError, GeoResult, IndexMatrix, Subswath};
use ndarray::Array2;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;

/// One translation table sample (r a topo lon lat)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransRecord {
    pub range: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub lon: f64,
    pub lat: f64,
}

impl TransRecord {
    /// Samples outside the radar footprint carry NaN radar coordinates
    pub fn is_valid(&self) -> bool {
        self.range.is_finite() && self.azimuth.is_finite()
    }
}

/// Azimuth (`y`) / range (`x`) bounding box of one translation table block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockExtent {
    pub block_row: usize,
    pub block_col: usize,
    pub y_min: f64,
    pub y_max: f64,
    pub x_min: f64,
    pub x_max: f64,
}

impl BlockExtent {
    /// Overlap test against a box expanded by `margin` on every side
    pub fn intersects(&self, y_min: f64, y_max: f64, x_min: f64, x_max: f64, margin: f64) -> bool {
        self.y_max >= y_min - margin
            && self.y_min <= y_max + margin
            && self.x_max >= x_min - margin
            && self.x_min <= x_max + margin
    }
}

/// Translation table laid out row-major over its own (lat, lon) grid
#[derive(Debug, Clone)]
pub struct TranslationTable {
    records: Vec<TransRecord>,
    lat: Coordinate,
    lon: Coordinate,
    block_shape: (usize, usize),
}

impl TranslationTable {
    pub fn new(
        records: Vec<TransRecord>,
        lat: Coordinate,
        lon: Coordinate,
        block_shape: (usize, usize),
    ) -> GeoResult<Self> {
        if records.len() != lat.len() * lon.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "{} translation records for a {}x{} grid",
                records.len(),
                lat.len(),
                lon.len()
            )));
        }
        if block_shape.0 == 0 || block_shape.1 == 0 {
            return Err(GeoError::ShapeMismatch(format!(
                "invalid block shape {:?}",
                block_shape
            )));
        }
        Ok(Self {
            records,
            lat,
            lon,
            block_shape,
        })
    }

    /// Build from per-cell azimuth, range and elevation grids
    pub fn from_arrays(
        azimuth: &Array2<f64>,
        range: &Array2<f64>,
        elevation: &Array2<f64>,
        lat: Coordinate,
        lon: Coordinate,
        block_shape: (usize, usize),
    ) -> GeoResult<Self> {
        let shape = (lat.len(), lon.len());
        if azimuth.dim() != shape || range.dim() != shape || elevation.dim() != shape {
            return Err(GeoError::ShapeMismatch(format!(
                "azimuth {:?}, range {:?} and elevation {:?} must match the {:?} table grid",
                azimuth.dim(),
                range.dim(),
                elevation.dim(),
                shape
            )));
        }
        let mut records = Vec::with_capacity(shape.0 * shape.1);
        for ((i, j), &az) in azimuth.indexed_iter() {
            records.push(TransRecord {
                range: range[[i, j]],
                azimuth: az,
                elevation: elevation[[i, j]],
                lon: lon.values[j],
                lat: lat.values[i],
            });
        }
        Self::new(records, lat, lon, block_shape)
    }

    pub fn records(&self) -> &[TransRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// (lat, lon) shape of the table grid
    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    pub fn lat(&self) -> &Coordinate {
        &self.lat
    }

    pub fn lon(&self) -> &Coordinate {
        &self.lon
    }

    pub fn block_shape(&self) -> (usize, usize) {
        self.block_shape
    }

    /// Number of blocks along (lat, lon)
    pub fn block_grid_shape(&self) -> (usize, usize) {
        let (rows, cols) = self.shape();
        (
            (rows + self.block_shape.0 - 1) / self.block_shape.0,
            (cols + self.block_shape.1 - 1) / self.block_shape.1,
        )
    }

    /// Table row and column ranges covered by block (iy, ix)
    pub fn block_ranges(&self, block_row: usize, block_col: usize) -> (Range<usize>, Range<usize>) {
        let (rows, cols) = self.shape();
        let r0 = (block_row * self.block_shape.0).min(rows);
        let c0 = (block_col * self.block_shape.1).min(cols);
        (
            r0..(r0 + self.block_shape.0).min(rows),
            c0..(c0 + self.block_shape.1).min(cols),
        )
    }

    /// Valid samples of one block as (azimuth, range, flattened label)
    pub fn block_samples(&self, block_row: usize, block_col: usize) -> Vec<(f64, f64, usize)> {
        let (row_range, col_range) = self.block_ranges(block_row, block_col);
        let cols = self.lon.len();
        let mut samples = Vec::with_capacity(row_range.len() * col_range.len());
        for i in row_range {
            for j in col_range.clone() {
                let label = i * cols + j;
                let record = &self.records[label];
                if record.is_valid() {
                    samples.push((record.azimuth, record.range, label));
                }
            }
        }
        samples
    }

    /// Azimuth/range bounding boxes of every block with at least one valid sample
    pub fn compute_block_extents(&self) -> Vec<BlockExtent> {
        let (n_rows, n_cols) = self.block_grid_shape();
        let mut extents = Vec::with_capacity(n_rows * n_cols);
        for block_row in 0..n_rows {
            for block_col in 0..n_cols {
                let samples = self.block_samples(block_row, block_col);
                if samples.is_empty() {
                    continue;
                }
                let mut extent = BlockExtent {
                    block_row,
                    block_col,
                    y_min: f64::INFINITY,
                    y_max: f64::NEG_INFINITY,
                    x_min: f64::INFINITY,
                    x_max: f64::NEG_INFINITY,
                };
                for &(azimuth, range, _) in &samples {
                    extent.y_min = extent.y_min.min(azimuth);
                    extent.y_max = extent.y_max.max(azimuth);
                    extent.x_min = extent.x_min.min(range);
                    extent.x_max = extent.x_max.max(range);
                }
                extents.push(extent);
            }
        }
        log::debug!(
            "Computed {} translation table block extents ({}x{} blocks)",
            extents.len(),
            n_rows,
            n_cols
        );
        extents
    }

    /// (azimuth, range) of every record in table order; invalid records are NaN
    pub fn radar_cloud(&self) -> GeoResult<PointCloud> {
        let azimuth = self.records.iter().map(|r| r.azimuth).collect();
        let range = self.records.iter().map(|r| r.range).collect();
        PointCloud::new(azimuth, range)
    }

    /// (lat, lon) of every valid record with its table position
    pub fn geographic_samples(&self) -> Vec<(f64, f64, usize)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.lat.is_finite() && r.lon.is_finite())
            .map(|(i, r)| (r.lat, r.lon, i))
            .collect()
    }
}

/// Supplies translation tables per subswath
pub trait TranslationTableAccessor: Send + Sync {
    /// Subswaths available for processing
    fn subswaths(&self) -> Vec<Subswath>;

    fn translation_table(&self, subswath: &Subswath) -> GeoResult<TranslationTable>;

    fn block_extents(&self, subswath: &Subswath) -> GeoResult<Vec<BlockExtent>> {
        Ok(self.translation_table(subswath)?.compute_block_extents())
    }

    /// Precomputed DEM-area matrix (DEM cell -> table record), when available
    fn radar_area_matrix(&self, _subswath: &Subswath) -> GeoResult<Option<IndexMatrix>> {
        Ok(None)
    }

    /// Regenerate the translation table for a merged subswath
    fn rebuild_merged(&self, _subswath: &Subswath) -> GeoResult<()> {
        Ok(())
    }
}

/// Translation tables held in memory
#[derive(Default)]
pub struct InMemoryTranslationTables {
    tables: HashMap<Subswath, TranslationTable>,
    area_matrices: HashMap<Subswath, IndexMatrix>,
    rebuilds: Mutex<Vec<Subswath>>,
}

impl InMemoryTranslationTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subswath: Subswath, table: TranslationTable) {
        self.tables.insert(subswath, table);
    }

    pub fn insert_area_matrix(&mut self, subswath: Subswath, matrix: IndexMatrix) {
        self.area_matrices.insert(subswath, matrix);
    }

    /// Subswaths for which a merged rebuild was requested
    pub fn rebuild_requests(&self) -> Vec<Subswath> {
        self.rebuilds
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl TranslationTableAccessor for InMemoryTranslationTables {
    fn subswaths(&self) -> Vec<Subswath> {
        let mut ids: Vec<Subswath> = self.tables.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn translation_table(&self, subswath: &Subswath) -> GeoResult<TranslationTable> {
        self.tables.get(subswath).cloned().ok_or_else(|| {
            GeoError::MissingInput(format!("no translation table for subswath {}", subswath))
        })
    }

    fn radar_area_matrix(&self, subswath: &Subswath) -> GeoResult<Option<IndexMatrix>> {
        Ok(self.area_matrices.get(subswath).cloned())
    }

    fn rebuild_merged(&self, subswath: &Subswath) -> GeoResult<()> {
        log::info!("Rebuilding translation table for merged subswath {}", subswath);
        let mut requests = self
            .rebuilds
            .lock()
            .map_err(|_| GeoError::Processing("rebuild log poisoned".to_string()))?;
        requests.push(subswath.clone());
        Ok(())
    }
}
