//! Access to interferogram products per pair

use crate::types::{GeoError, GeoResult, Grid, GridStack, LayerLabels};
use std::collections::HashMap;

/// Layer axis name for interferogram stacks
pub const PAIR_AXIS: &str = "pair";

/// Opens product rasters for a list of interferogram pairs
pub trait RasterStore: Send + Sync {
    /// Stack of `product` layers, one per pair, aligned on a common grid
    fn open_layers(&self, pairs: &[String], product: &str) -> GeoResult<GridStack>;
}

/// Rasters held in memory, keyed by (pair, product)
#[derive(Debug, Default)]
pub struct InMemoryRasterStore {
    grids: HashMap<(String, String), Grid>,
}

impl InMemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: impl Into<String>, product: impl Into<String>, grid: Grid) {
        self.grids.insert((pair.into(), product.into()), grid);
    }
}

impl RasterStore for InMemoryRasterStore {
    fn open_layers(&self, pairs: &[String], product: &str) -> GeoResult<GridStack> {
        if pairs.is_empty() {
            return Err(GeoError::EmptyInput("no pairs requested".to_string()));
        }
        let layers = pairs
            .iter()
            .map(|pair| {
                self.grids
                    .get(&(pair.clone(), product.to_string()))
                    .cloned()
                    .ok_or_else(|| GeoError::NotFound(format!("{}_{}", pair, product)))
            })
            .collect::<GeoResult<Vec<_>>>()?;
        GridStack::from_layers(LayerLabels::new(PAIR_AXIS, pairs.to_vec()), layers)
    }
}

#[cfg(feature = "gdal")]
pub use gdal_store::GdalRasterStore;

#[cfg(feature = "gdal")]
mod gdal_store {
    use super::{RasterStore, PAIR_AXIS};
    use crate::types::{
        Coordinate, CoordinateSystem, GeoError, GeoResult, Grid, GridStack, LayerLabels,
    };
    use gdal::Dataset;
    use ndarray::Array2;
    use std::path::{Path, PathBuf};

    /// Reads `{pair}_{product}.grd` (or `.tif`) files from a directory
    #[derive(Debug, Clone)]
    pub struct GdalRasterStore {
        basedir: PathBuf,
        system: CoordinateSystem,
    }

    impl GdalRasterStore {
        pub fn new<P: AsRef<Path>>(basedir: P, system: CoordinateSystem) -> Self {
            Self {
                basedir: basedir.as_ref().to_path_buf(),
                system,
            }
        }

        fn locate(&self, pair: &str, product: &str) -> GeoResult<PathBuf> {
            ["grd", "tif"]
                .iter()
                .map(|ext| self.basedir.join(format!("{}_{}.{}", pair, product, ext)))
                .find(|path| path.exists())
                .ok_or_else(|| {
                    GeoError::NotFound(format!(
                        "{}_{} in {}",
                        pair,
                        product,
                        self.basedir.display()
                    ))
                })
        }

        fn read_grid(&self, path: &Path) -> GeoResult<Grid> {
            log::debug!("Reading raster: {}", path.display());
            let dataset = Dataset::open(path)?;
            let geo_transform = dataset.geo_transform()?;
            let (width, height) = dataset.raster_size();

            let rasterband = dataset.rasterband(1)?;
            let band_data =
                rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            let data = Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
                GeoError::ShapeMismatch(format!("failed to reshape {}: {}", path.display(), e))
            })?;

            // Geotransform origin is the outer corner; axes hold cell centers
            let (row_name, col_name) = self.system.axis_names();
            let rows = Coordinate::regular(
                row_name,
                geo_transform[3] + 0.5 * geo_transform[5],
                geo_transform[5],
                height,
            );
            let cols = Coordinate::regular(
                col_name,
                geo_transform[0] + 0.5 * geo_transform[1],
                geo_transform[1],
                width,
            );
            Grid::new(data, rows, cols)
        }
    }

    impl RasterStore for GdalRasterStore {
        fn open_layers(&self, pairs: &[String], product: &str) -> GeoResult<GridStack> {
            if pairs.is_empty() {
                return Err(GeoError::EmptyInput("no pairs requested".to_string()));
            }
            let layers = pairs
                .iter()
                .map(|pair| self.read_grid(&self.locate(pair, product)?))
                .collect::<GeoResult<Vec<_>>>()?;
            log::info!("Opened {} {} layers", layers.len(), product);
            GridStack::from_layers(LayerLabels::new(PAIR_AXIS, pairs.to_vec()), layers)
        }
    }
}
