//! Core geocoding modules

pub mod parallel;
pub mod nearest;
pub mod forward_matrix;
pub mod inverse_matrix;
pub mod resample;
pub mod geocode;

// Re-export main types
pub use parallel::{Deferred, JobHandle, LogProgress, NoProgress, ProgressCounter, ProgressReporter, WorkerPool};
pub use nearest::{NearestIndex, Neighbor, PointCloud};
pub use forward_matrix::{build_area_matrix, ForwardMatrixBuilder};
pub use inverse_matrix::{InverseMatrixBuilder, Tile};
pub use resample::{ForwardResampler, InverseResampler};
pub use geocode::{GeocodeMode, Geocoder};
