//! Input/output: translation tables, rasters and persisted matrices

pub mod trans_table;
pub mod raster_store;
pub mod matrix_store;

// Re-export main types
pub use trans_table::{
    BlockExtent, InMemoryTranslationTables, TransRecord, TranslationTable,
    TranslationTableAccessor,
};
pub use raster_store::{InMemoryRasterStore, RasterStore, PAIR_AXIS};
#[cfg(feature = "gdal")]
pub use raster_store::GdalRasterStore;
pub use matrix_store::MatrixStore;
