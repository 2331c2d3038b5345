use crate::config::GeocodeConfig;
use crate::core::nearest::{half_diagonal_tolerance, NearestIndex, PointCloud};
use crate::core::parallel::WorkerPool;
use crate::io::trans_table::TranslationTable;
use crate::types::{
    CellIndex, Coordinate, CoordinateSystem, GeoError, GeoResult, Grid, GridRegistration,
    IndexMatrix, MatrixKind,
};
use ndarray::Array2;

/// Builds the radar -> geographic matrix: for every geographic cell, the
/// flattened index of the radar grid cell it samples
#[derive(Debug, Clone)]
pub struct ForwardMatrixBuilder {
    /// Added to the half radar cell diagonal
    distance_epsilon: f64,
}

impl Default for ForwardMatrixBuilder {
    fn default() -> Self {
        Self::new(1e-2)
    }
}

impl ForwardMatrixBuilder {
    pub fn new(distance_epsilon: f64) -> Self {
        Self { distance_epsilon }
    }

    pub fn from_config(config: &GeocodeConfig) -> Self {
        Self::new(config.distance_epsilon)
    }

    /// Matching radius for one radar cell: half its diagonal plus epsilon
    pub fn tolerance(&self, reference: &Grid) -> GeoResult<f64> {
        let (dy, dx) = axis_spacing(&reference.rows, &reference.cols)?;
        Ok(half_diagonal_tolerance(dy, dx, self.distance_epsilon))
    }

    /// Build the forward matrix.
    ///
    /// * `reference` - radar grid (min composite of the interferogram stack)
    /// * `table` - translation table for the subswath
    /// * `area` - DEM-area matrix pointing each geographic cell at a table record
    pub fn build(
        &self,
        reference: &Grid,
        table: &TranslationTable,
        area: &IndexMatrix,
        pool: &WorkerPool,
    ) -> GeoResult<IndexMatrix> {
        reference.require_system(CoordinateSystem::Radar)?;
        if area.source_size() != table.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "area matrix indexes {} records but the translation table has {}",
                area.source_size(),
                table.len()
            )));
        }

        let tolerance = self.tolerance(reference)?;
        log::info!(
            "Building forward matrix: radar grid {:?}, {} translation records, geographic grid {:?}",
            reference.shape(),
            table.len(),
            area.shape()
        );
        log::debug!("Radar cell matching tolerance: {:.4}", tolerance);

        // Each lat/lon cell has zero or one radar neighbour; a radar cell may
        // serve several lat/lon cells along borders
        let index = NearestIndex::build(&PointCloud::from_grid(reference))?;
        let matches = index.query(&table.radar_cloud()?, Some(tolerance), pool);

        let mut indices = Vec::with_capacity(area.indices.len());
        for cell in area.indices.iter() {
            let value = match cell.get() {
                Some(record) if record >= matches.len() => {
                    return Err(GeoError::IndexOutOfRange {
                        index: record,
                        size: matches.len(),
                    })
                }
                Some(record) => match matches[record] {
                    Some(neighbor) => CellIndex::new(neighbor.index)?,
                    None => CellIndex::NONE,
                },
                None => CellIndex::NONE,
            };
            indices.push(value);
        }
        let indices = Array2::from_shape_vec(area.shape(), indices)
            .map_err(|e| GeoError::ShapeMismatch(format!("failed to shape forward matrix: {}", e)))?;

        let matrix = IndexMatrix {
            kind: MatrixKind::Forward,
            indices,
            rows: area.rows.clone(),
            cols: area.cols.clone(),
            source_rows: reference.rows.clone(),
            source_cols: reference.cols.clone(),
            // Cell-centered, otherwise resampled output shifts by half a pixel
            registration: GridRegistration::CellCentered,
        };

        if let Some(max_index) = matrix.max_index() {
            if max_index >= reference.size() {
                return Err(GeoError::IndexOutOfRange {
                    index: max_index,
                    size: reference.size(),
                });
            }
        }

        log::info!(
            "✅ Forward matrix built: {:?}, {:.1}% coverage",
            matrix.shape(),
            matrix.coverage()
        );
        Ok(matrix)
    }
}

/// Build the DEM-area matrix: for each (lat, lon) cell, the nearest
/// translation table record within half the cell diagonal plus `epsilon`
pub fn build_area_matrix(
    lat: &Coordinate,
    lon: &Coordinate,
    table: &TranslationTable,
    epsilon: f64,
    pool: &WorkerPool,
) -> GeoResult<IndexMatrix> {
    let (dlat, dlon) = axis_spacing(lat, lon)?;
    let tolerance = half_diagonal_tolerance(dlat, dlon, epsilon);

    let samples = table.geographic_samples();
    let labels: Vec<usize> = samples.iter().map(|&(_, _, label)| label).collect();
    let source = PointCloud::new(
        samples.iter().map(|&(la, _, _)| la).collect(),
        samples.iter().map(|&(_, lo, _)| lo).collect(),
    )?;
    let index = NearestIndex::build(&source)?;

    let mut target_lat = Vec::with_capacity(lat.len() * lon.len());
    let mut target_lon = Vec::with_capacity(lat.len() * lon.len());
    for &la in &lat.values {
        for &lo in &lon.values {
            target_lat.push(la);
            target_lon.push(lo);
        }
    }
    let targets = PointCloud::new(target_lat, target_lon)?;
    let matches = index.query(&targets, Some(tolerance), pool);

    let indices = matches
        .iter()
        .map(|found| match found {
            Some(neighbor) => CellIndex::new(labels[neighbor.index]),
            None => Ok(CellIndex::NONE),
        })
        .collect::<GeoResult<Vec<_>>>()?;
    let indices = Array2::from_shape_vec((lat.len(), lon.len()), indices)
        .map_err(|e| GeoError::ShapeMismatch(format!("failed to shape area matrix: {}", e)))?;

    let matrix = IndexMatrix::new(
        MatrixKind::Area,
        indices,
        lat.clone(),
        lon.clone(),
        table.lat().clone(),
        table.lon().clone(),
        GridRegistration::Gridline,
    )?;
    log::info!(
        "Area matrix built: {:?}, {:.1}% of DEM cells inside the translation table",
        matrix.shape(),
        matrix.coverage()
    );
    Ok(matrix)
}

/// First spacing along each axis; both axes need at least two values
fn axis_spacing(rows: &Coordinate, cols: &Coordinate) -> GeoResult<(f64, f64)> {
    let dy = rows.spacing().ok_or_else(|| {
        GeoError::ShapeMismatch(format!("axis '{}' needs at least two cells", rows.name))
    })?;
    let dx = cols.spacing().ok_or_else(|| {
        GeoError::ShapeMismatch(format!("axis '{}' needs at least two cells", cols.name))
    })?;
    Ok((dy, dx))
}
