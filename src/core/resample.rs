//! Applying index matrices to layers and stacks

use crate::core::parallel::{ProgressCounter, WorkerPool};
use crate::types::{
    CellIndex, CoordinateSystem, GeoError, GeoResult, Grid, GridStack, IndexMatrix, MatrixKind,
    Raster, SarRealImage,
};
use ndarray::{Array2, Zip};
use rayon::prelude::*;

/// Gather values from a flattened source grid. Sentinel entries and entries
/// past the end of `source` become NaN.
pub fn gather(indices: &Array2<CellIndex>, source: &[f32]) -> SarRealImage {
    let size = source.len();
    Zip::from(indices).par_map_collect(|idx| match idx.get() {
        Some(i) if i < size => source[i],
        _ => f32::NAN,
    })
}

fn gather_grid(matrix: &IndexMatrix, grid: &Grid) -> GeoResult<Grid> {
    let data = grid.data.as_standard_layout();
    let flat = data
        .as_slice()
        .ok_or_else(|| GeoError::Processing("raster is not contiguous".to_string()))?;
    Grid::new(gather(&matrix.indices, flat), matrix.rows.clone(), matrix.cols.clone())
}

fn check_kind(matrix: &IndexMatrix, expected: MatrixKind) -> GeoResult<()> {
    if matrix.kind != expected {
        return Err(GeoError::InvalidFormat(format!(
            "expected a {} matrix, got {}",
            expected, matrix.kind
        )));
    }
    Ok(())
}

/// Transform every layer of a stack in parallel; any failed layer fails the stack
fn map_stack<F>(
    stack: &GridStack,
    matrix: &IndexMatrix,
    pool: &WorkerPool,
    progress: Option<&ProgressCounter>,
    transform: F,
) -> GeoResult<GridStack>
where
    F: Fn(&Grid) -> GeoResult<Grid> + Sync,
{
    let layers: Vec<SarRealImage> = pool.install(|| {
        (0..stack.len())
            .into_par_iter()
            .map(|i| -> GeoResult<SarRealImage> {
                let grid = transform(&stack.layer(i))?;
                if let Some(counter) = progress {
                    counter.tick();
                }
                Ok(grid.data)
            })
            .collect::<GeoResult<Vec<_>>>()
    })?;
    stack.with_layers(layers, matrix.rows.clone(), matrix.cols.clone())
}

/// Radar -> geographic resampling with the forward matrix
#[derive(Debug, Clone)]
pub struct ForwardResampler {
    matrix: IndexMatrix,
}

impl ForwardResampler {
    pub fn new(matrix: IndexMatrix) -> GeoResult<Self> {
        check_kind(&matrix, MatrixKind::Forward)?;
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &IndexMatrix {
        &self.matrix
    }

    /// Geocode a single radar layer
    pub fn apply_layer(&self, grid: &Grid) -> GeoResult<Grid> {
        // Layers cropped by an azimuth line are padded to the matrix source grid
        if grid.rows.matches(&self.matrix.source_rows) && grid.cols.matches(&self.matrix.source_cols) {
            gather_grid(&self.matrix, grid)
        } else {
            let aligned = grid.reindex_like(&self.matrix.source_rows, &self.matrix.source_cols);
            gather_grid(&self.matrix, &aligned)
        }
    }

    pub fn apply(&self, raster: Raster, pool: &WorkerPool) -> GeoResult<Raster> {
        self.apply_with_progress(raster, pool, None)
    }

    /// Geocode a layer or stack; non-radar input is returned unchanged
    pub fn apply_with_progress(
        &self,
        raster: Raster,
        pool: &WorkerPool,
        progress: Option<&ProgressCounter>,
    ) -> GeoResult<Raster> {
        if raster.coordinate_system() != Some(CoordinateSystem::Radar) {
            let (rows, cols) = raster.axes();
            log::warn!(
                "NOTE: raster axes ({}, {}) are not radar coordinates, skipping geocoding",
                rows.name,
                cols.name
            );
            return Ok(raster);
        }
        match raster {
            Raster::Layer(grid) => {
                let result = pool.install(|| self.apply_layer(&grid))?;
                if let Some(counter) = progress {
                    counter.tick();
                }
                Ok(Raster::Layer(result))
            }
            Raster::Stack(stack) => {
                log::info!("Geocoding {} layers onto {:?} grid", stack.len(), self.matrix.shape());
                let result = map_stack(&stack, &self.matrix, pool, progress, |g| self.apply_layer(g))?;
                Ok(Raster::Stack(result))
            }
        }
    }
}

/// Geographic -> radar resampling with the inverse matrix
#[derive(Debug, Clone)]
pub struct InverseResampler {
    matrix: IndexMatrix,
}

impl InverseResampler {
    pub fn new(matrix: IndexMatrix) -> GeoResult<Self> {
        check_kind(&matrix, MatrixKind::Inverse)?;
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &IndexMatrix {
        &self.matrix
    }

    /// Move a single geographic layer into radar coordinates.
    ///
    /// The layer is first put on the translation table grid by nearest
    /// neighbour only, so binary masks and class values survive intact.
    pub fn apply_layer(&self, grid: &Grid) -> GeoResult<Grid> {
        if grid.rows.matches(&self.matrix.source_rows) && grid.cols.matches(&self.matrix.source_cols) {
            gather_grid(&self.matrix, grid)
        } else {
            let on_table = grid.interp_nearest(&self.matrix.source_rows, &self.matrix.source_cols);
            gather_grid(&self.matrix, &on_table)
        }
    }

    pub fn apply(&self, raster: Raster, pool: &WorkerPool) -> GeoResult<Raster> {
        self.apply_with_progress(raster, pool, None)
    }

    /// Inverse geocode a layer or stack; non-geographic input is returned unchanged
    pub fn apply_with_progress(
        &self,
        raster: Raster,
        pool: &WorkerPool,
        progress: Option<&ProgressCounter>,
    ) -> GeoResult<Raster> {
        if raster.coordinate_system() != Some(CoordinateSystem::Geographic) {
            let (rows, cols) = raster.axes();
            log::warn!(
                "NOTE: raster axes ({}, {}) are not geographic coordinates, skipping inverse geocoding",
                rows.name,
                cols.name
            );
            return Ok(raster);
        }
        match raster {
            Raster::Layer(grid) => {
                let result = pool.install(|| self.apply_layer(&grid))?;
                if let Some(counter) = progress {
                    counter.tick();
                }
                Ok(Raster::Layer(result))
            }
            Raster::Stack(stack) => {
                log::info!(
                    "Inverse geocoding {} layers onto {:?} radar grid",
                    stack.len(),
                    self.matrix.shape()
                );
                let result = map_stack(&stack, &self.matrix, pool, progress, |g| self.apply_layer(g))?;
                Ok(Raster::Stack(result))
            }
        }
    }
}
