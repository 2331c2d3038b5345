//! Geocoding configuration threaded through the orchestrator, builders and resamplers

use crate::types::{GeoError, GeoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Explicit processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename = "geocode")]
pub struct GeocodeConfig {
    /// Directory holding persisted matrices (and rasters for file-backed stores)
    pub basedir: PathBuf,
    /// Tile edge (cells) for the block-partitioned inverse matrix build
    pub chunk_size: usize,
    /// zlib compression level for persisted matrices (0-9)
    pub compression_level: u32,
    /// Worker threads; `None` uses all available cores
    pub num_threads: Option<usize>,
    /// Interferogram product used as the reference radar grid
    pub product: String,
    /// Added to the half cell diagonal for radar cell matching
    pub distance_epsilon: f64,
    /// Added to the half cell diagonal for DEM to translation table matching
    pub area_distance_epsilon: f64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from("."),
            chunk_size: 512,
            compression_level: 6,
            num_threads: None,
            product: "phasefilt".to_string(),
            distance_epsilon: 1e-2,
            area_distance_epsilon: 1e-6,
        }
    }
}

impl GeocodeConfig {
    /// Configuration rooted at `basedir` with default parameters
    pub fn new<P: AsRef<Path>>(basedir: P) -> Self {
        Self {
            basedir: basedir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Single-threaded variant for reproducible runs
    pub fn sequential(mut self) -> Self {
        self.num_threads = Some(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Load configuration from an XML file
    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> GeoResult<Self> {
        log::info!("Loading geocoding configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml_str(&content)
    }

    pub fn from_xml_str(content: &str) -> GeoResult<Self> {
        let config: GeocodeConfig = quick_xml::de::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_xml_string(&self) -> GeoResult<String> {
        Ok(quick_xml::se::to_string(self)?)
    }

    pub fn validate(&self) -> GeoResult<()> {
        if self.chunk_size == 0 {
            return Err(GeoError::ShapeMismatch("chunk_size must be positive".to_string()));
        }
        if self.compression_level > 9 {
            return Err(GeoError::InvalidFormat(format!(
                "compression level {} outside 0..=9",
                self.compression_level
            )));
        }
        if self.num_threads == Some(0) {
            return Err(GeoError::MissingInput("num_threads must be at least 1".to_string()));
        }
        if self.product.is_empty() {
            return Err(GeoError::MissingInput("reference product name is empty".to_string()));
        }
        if !(self.distance_epsilon >= 0.0) || !(self.area_distance_epsilon >= 0.0) {
            return Err(GeoError::InvalidFormat("distance epsilons must be non-negative".to_string()));
        }
        Ok(())
    }
}
