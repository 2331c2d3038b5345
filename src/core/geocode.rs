//! Geocoding entry point: matrix preparation and raster transforms per subswath

use crate::config::GeocodeConfig;
use crate::core::forward_matrix::{build_area_matrix, ForwardMatrixBuilder};
use crate::core::inverse_matrix::InverseMatrixBuilder;
use crate::core::parallel::{Deferred, ProgressCounter, ProgressReporter, WorkerPool};
use crate::core::resample::{ForwardResampler, InverseResampler};
use crate::io::matrix_store::MatrixStore;
use crate::io::raster_store::RasterStore;
use crate::io::trans_table::{TranslationTable, TranslationTableAccessor};
use crate::types::{
    CoordinateSystem, GeoError, GeoResult, Grid, IndexMatrix, MatrixKind, Raster, Subswath,
};
use std::sync::Arc;

/// How `open_grids` returns the product layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeMode {
    /// As stored
    Radar,
    /// Radar layers geocoded onto the lat/lon grid
    Forward,
    /// Geographic layers moved into radar coordinates
    Inverse,
}

/// Builds, persists and applies the geocoding matrices
pub struct Geocoder {
    config: GeocodeConfig,
    tables: Arc<dyn TranslationTableAccessor>,
    rasters: Arc<dyn RasterStore>,
    store: MatrixStore,
    pool: Arc<WorkerPool>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Geocoder {
    pub fn new(
        config: GeocodeConfig,
        tables: Arc<dyn TranslationTableAccessor>,
        rasters: Arc<dyn RasterStore>,
    ) -> GeoResult<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(config.num_threads)?);
        let store = MatrixStore::from_config(&config);
        log::info!(
            "Geocoder ready: basedir {}, {} worker threads",
            config.basedir.display(),
            pool.num_threads()
        );
        Ok(Self {
            config,
            tables,
            rasters,
            store,
            pool,
            reporter: None,
        })
    }

    /// Report progress of builds and stack transforms
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &GeocodeConfig {
        &self.config
    }

    pub fn store(&self) -> &MatrixStore {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Check an explicit subswath exists, or pick the only one available
    pub fn resolve_subswath(&self, subswath: Option<&Subswath>) -> GeoResult<Subswath> {
        let available = self.tables.subswaths();
        match subswath {
            Some(id) if available.contains(id) => Ok(id.clone()),
            Some(id) => Err(GeoError::MissingInput(format!(
                "subswath {} not found, available: {:?}",
                id,
                available.iter().map(Subswath::as_str).collect::<Vec<_>>()
            ))),
            None => match available.as_slice() {
                [single] => Ok(single.clone()),
                [] => Err(GeoError::MissingInput("no subswaths available".to_string())),
                _ => Err(GeoError::MissingInput(format!(
                    "several subswaths available ({:?}), specify one",
                    available.iter().map(Subswath::as_str).collect::<Vec<_>>()
                ))),
            },
        }
    }

    /// Min composite of the reference product over `pairs`
    pub fn reference_grid(&self, pairs: &[String]) -> GeoResult<Grid> {
        let stack = self.rasters.open_layers(pairs, &self.config.product)?;
        stack.min_composite()
    }

    fn area_matrix(&self, subswath: &Subswath, table: &TranslationTable) -> GeoResult<IndexMatrix> {
        match self.tables.radar_area_matrix(subswath)? {
            Some(matrix) => Ok(matrix),
            None => {
                log::debug!("No stored area matrix for subswath {}, building one", subswath);
                build_area_matrix(
                    table.lat(),
                    table.lon(),
                    table,
                    self.config.area_distance_epsilon,
                    &self.pool,
                )
            }
        }
    }

    fn counter(&self, description: &str, units: usize) -> ProgressCounter {
        if let Some(reporter) = &self.reporter {
            reporter.start(description, units);
        }
        ProgressCounter::new(units, self.reporter.clone())
    }

    fn finish(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.finish();
        }
    }

    /// Forward matrix for `reference`, not persisted
    pub fn build_forward_matrix(&self, subswath: &Subswath, reference: &Grid) -> GeoResult<IndexMatrix> {
        let table = self.tables.translation_table(subswath)?;
        let area = self.area_matrix(subswath, &table)?;
        ForwardMatrixBuilder::from_config(&self.config).build(reference, &table, &area, &self.pool)
    }

    /// Inverse matrix for `reference`, not persisted
    pub fn build_inverse_matrix(&self, subswath: &Subswath, reference: &Grid) -> GeoResult<IndexMatrix> {
        let table = self.tables.translation_table(subswath)?;
        let extents = self.tables.block_extents(subswath)?;
        let builder = InverseMatrixBuilder::from_config(&self.config);
        let counter = self.counter("Inverse matrix tiles", builder.tiles(reference.shape()).len());
        let result = builder.build(reference, &table, &extents, &self.pool, Some(&counter));
        self.finish();
        result
    }

    /// Build and persist both matrices for a subswath from the first pair's
    /// reference product. Merged subswaths get their translation table
    /// regenerated first. Both matrices are built and encoded before either
    /// stored file is replaced.
    pub fn geocode_parallel(&self, subswath: Option<&Subswath>, pairs: &[String]) -> GeoResult<Subswath> {
        let first = pairs
            .first()
            .ok_or_else(|| GeoError::MissingInput("no pairs to build matrices from".to_string()))?;
        let subswath = self.resolve_subswath(subswath)?;
        log::info!("Building geocoding matrices for subswath {}", subswath);

        if subswath.is_merged() {
            self.tables.rebuild_merged(&subswath)?;
        }

        let reference = self.reference_grid(std::slice::from_ref(first))?;
        let forward = self.build_forward_matrix(&subswath, &reference)?;
        let inverse = self.build_inverse_matrix(&subswath, &reference)?;

        self.store.save_all(&subswath, &[&forward, &inverse])?;
        log::info!("✅ Geocoding matrices saved for subswath {}", subswath);
        Ok(subswath)
    }

    /// Rebuild the matrices when missing or built for a different
    /// interferogram grid. Returns true when a rebuild happened.
    pub fn ensure_matrices(&self, subswath: Option<&Subswath>, pairs: &[String]) -> GeoResult<bool> {
        let resolved = self.resolve_subswath(subswath)?;
        let first = pairs
            .first()
            .ok_or_else(|| GeoError::MissingInput("no pairs to check matrices against".to_string()))?;

        let stale = if !self.store.exists(&resolved, MatrixKind::Forward)
            || !self.store.exists(&resolved, MatrixKind::Inverse)
        {
            log::info!("Geocoding matrices missing for subswath {}", resolved);
            true
        } else {
            let reference = self.reference_grid(std::slice::from_ref(first))?;
            let forward = self.store.load(&resolved, MatrixKind::Forward)?;
            let inverse = self.store.load(&resolved, MatrixKind::Inverse)?;
            let matches = forward.source_rows.matches(&reference.rows)
                && forward.source_cols.matches(&reference.cols)
                && inverse.rows.matches(&reference.rows)
                && inverse.cols.matches(&reference.cols);
            if !matches {
                log::info!(
                    "Geocoding matrices for subswath {} were built for a different grid, rebuilding",
                    resolved
                );
            }
            !matches
        };

        if stale {
            self.geocode_parallel(Some(&resolved), pairs)?;
        }
        Ok(stale)
    }

    /// Forward matrix build as a deferred job; nothing is persisted
    pub fn forward_matrix_deferred(
        &self,
        subswath: Option<&Subswath>,
        reference: Grid,
    ) -> GeoResult<Deferred<IndexMatrix>> {
        let subswath = self.resolve_subswath(subswath)?;
        let table = self.tables.translation_table(&subswath)?;
        let area = self.area_matrix(&subswath, &table)?;
        let builder = ForwardMatrixBuilder::from_config(&self.config);
        let pool = Arc::clone(&self.pool);
        Ok(Deferred::new(
            format!("Forward matrix F{}", subswath),
            1,
            move |counter: &ProgressCounter| {
                let matrix = builder.build(&reference, &table, &area, &pool)?;
                counter.tick();
                Ok(matrix)
            },
        ))
    }

    /// Inverse matrix build as a deferred job; nothing is persisted
    pub fn inverse_matrix_deferred(
        &self,
        subswath: Option<&Subswath>,
        reference: Grid,
    ) -> GeoResult<Deferred<IndexMatrix>> {
        let subswath = self.resolve_subswath(subswath)?;
        let table = self.tables.translation_table(&subswath)?;
        let extents = self.tables.block_extents(&subswath)?;
        let builder = InverseMatrixBuilder::from_config(&self.config);
        let units = builder.tiles(reference.shape()).len();
        let pool = Arc::clone(&self.pool);
        Ok(Deferred::new(
            format!("Inverse matrix F{}", subswath),
            units,
            move |counter: &ProgressCounter| {
                builder.build(&reference, &table, &extents, &pool, Some(counter))
            },
        ))
    }

    /// Radar -> geographic with the stored forward matrix
    pub fn geocode(&self, subswath: Option<&Subswath>, raster: Raster) -> GeoResult<Raster> {
        if raster.coordinate_system() != Some(CoordinateSystem::Radar) {
            log::warn!("NOTE: the grid is not in radar coordinates, skipping geocoding");
            return Ok(raster);
        }
        let subswath = self.resolve_subswath(subswath)?;
        let resampler = ForwardResampler::new(self.store.load(&subswath, MatrixKind::Forward)?)?;
        let counter = self.counter("Geocoding", layer_count(&raster));
        let result = resampler.apply_with_progress(raster, &self.pool, Some(&counter));
        self.finish();
        result
    }

    /// Geographic -> radar with the stored inverse matrix
    pub fn inverse_geocode(&self, subswath: Option<&Subswath>, raster: Raster) -> GeoResult<Raster> {
        if raster.coordinate_system() != Some(CoordinateSystem::Geographic) {
            log::warn!("NOTE: the grid is not in geographic coordinates, skipping inverse geocoding");
            return Ok(raster);
        }
        let subswath = self.resolve_subswath(subswath)?;
        let resampler = InverseResampler::new(self.store.load(&subswath, MatrixKind::Inverse)?)?;
        let counter = self.counter("Inverse geocoding", layer_count(&raster));
        let result = resampler.apply_with_progress(raster, &self.pool, Some(&counter));
        self.finish();
        result
    }

    /// Open `product` for `pairs`, optionally geocoded
    pub fn open_grids(
        &self,
        subswath: Option<&Subswath>,
        pairs: &[String],
        product: &str,
        mode: GeocodeMode,
    ) -> GeoResult<Raster> {
        let stack = Raster::Stack(self.rasters.open_layers(pairs, product)?);
        match mode {
            GeocodeMode::Radar => Ok(stack),
            GeocodeMode::Forward => self.geocode(subswath, stack),
            GeocodeMode::Inverse => self.inverse_geocode(subswath, stack),
        }
    }
}

fn layer_count(raster: &Raster) -> usize {
    match raster {
        Raster::Layer(_) => 1,
        Raster::Stack(stack) => stack.len(),
    }
}
