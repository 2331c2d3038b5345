//! sargeo: bidirectional geocoding for SAR interferogram stacks
//!
//! Builds nearest-neighbour index matrices between the radar (azimuth/range)
//! grid of an interferogram and the geographic (lat/lon) grid of its DEM, and
//! uses them to move layers and stacks between the two coordinate systems.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    CellIndex, Coordinate, CoordinateSystem, GeoError, GeoResult, Grid, GridRegistration,
    GridStack, IndexMatrix, LayerLabels, MatrixKind, Raster, SarReal, SarRealImage, Subswath,
};
pub use config::GeocodeConfig;
pub use io::{
    InMemoryRasterStore, InMemoryTranslationTables, MatrixStore, RasterStore, TranslationTable,
    TranslationTableAccessor,
};
pub use crate::core::{ForwardResampler, GeocodeMode, Geocoder, InverseResampler, WorkerPool};
